use secrecy::SecretString;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::task::JoinSet;
use tollgate::auth::{
    credentials::hash_secret, rate_limit::NoopRateLimiter, Account, AccountDirectory, AuthConfig,
    AuthError,
    AuthService, FederatedProfile, LocalSignup, MemoryAccounts, MemoryStore, Role, Subject,
    TokenCodec,
};
use uuid::Uuid;

const SECRET: &str = "k9Qm2xV7pL4tR8wZ1nB6cY3hJ5dF0sGq";
const FLOOR: Duration = Duration::from_millis(60);

struct Harness {
    auth: Arc<AuthService>,
    store: Arc<MemoryStore>,
    accounts: Arc<MemoryAccounts>,
}

fn params() -> argon2::Params {
    argon2::Params::new(8, 1, 1, None).expect("argon2 params")
}

fn account(email: &str, password: &str, role: Role) -> Account {
    Account {
        id: Uuid::new_v4(),
        email: email.to_string(),
        display_name: "Test".to_string(),
        role,
        verified: true,
        password_hash: Some(hash_secret(password, &params()).expect("hash")),
        phone: None,
        linked_identities: Vec::new(),
    }
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    build(store.clone(), |config, codec, accounts| {
        AuthService::new(config, codec, store, accounts)
    })
    .await
}

async fn unlimited_harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    build(store.clone(), |config, codec, accounts| {
        AuthService::with_rate_limiter(config, codec, store, accounts, Arc::new(NoopRateLimiter))
    })
    .await
}

async fn build<F>(store: Arc<MemoryStore>, service: F) -> Harness
where
    F: FnOnce(AuthConfig, TokenCodec, Arc<MemoryAccounts>) -> anyhow::Result<AuthService>,
{
    let accounts = Arc::new(MemoryAccounts::new());
    accounts
        .insert(account("a@x.com", "Secret#123", Role::User))
        .await;
    accounts
        .insert(account("b@y.com", "Other#456", Role::Admin))
        .await;

    let config = config();
    let codec = codec(&config);
    let auth = service(config, codec, accounts.clone()).expect("service");

    Harness {
        auth: Arc::new(auth),
        store,
        accounts,
    }
}

fn config() -> AuthConfig {
    AuthConfig::new()
        .with_min_failure_response(FLOOR)
        .with_password_params(params())
}

fn codec(config: &AuthConfig) -> TokenCodec {
    TokenCodec::new(
        &SecretString::from(SECRET),
        config.access_token_ttl(),
        config.refresh_token_ttl(),
    )
    .expect("codec")
}

/// Another service instance over the same store and accounts.
fn second_instance(h: &Harness) -> AuthService {
    let config = config();
    let codec = codec(&config);
    AuthService::new(config, codec, h.store.clone(), h.accounts.clone()).expect("service")
}

fn secret(value: &str) -> SecretString {
    SecretString::from(value)
}

#[tokio::test]
async fn login_then_rotate_invalidates_the_old_refresh_token() {
    let h = harness().await;

    let first = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");
    let second = h
        .auth
        .refresh(&first.refresh_token, "1.2.3.4")
        .await
        .expect("rotate");
    assert_ne!(first.refresh_token, second.refresh_token);
    assert_ne!(first.access_token, second.access_token);

    let reused = h.auth.refresh(&first.refresh_token, "1.2.3.4").await;
    assert_eq!(reused.unwrap_err(), AuthError::InvalidToken);

    // the rotated pair keeps working
    let claims = h
        .auth
        .verify_access(&second.access_token)
        .await
        .expect("verify");
    assert_eq!(claims.email, "a@x.com");
}

#[tokio::test]
async fn signup_limit_allows_ten_per_hour() {
    let h = harness().await;

    for _ in 0..10 {
        h.auth.check_signup("9.9.9.9").await.expect("within limit");
    }
    match h.auth.check_signup("9.9.9.9").await {
        Err(AuthError::RateLimitExceeded {
            retry_after_seconds,
        }) => assert!(retry_after_seconds > 0),
        other => panic!("expected rate limit, got {other:?}"),
    }

    // other subjects have their own bucket
    h.auth.check_signup("9.9.9.8").await.expect("separate bucket");
}

#[tokio::test]
async fn federated_login_merges_into_existing_account() {
    let h = harness().await;

    let resolution = h
        .auth
        .resolve_federated_login(FederatedProfile {
            provider: "google".to_string(),
            provider_user_id: "g123".to_string(),
            email: "b@y.com".to_string(),
            name: "B".to_string(),
        })
        .await
        .expect("resolve");

    assert!(!resolution.is_new_account);
    assert_eq!(resolution.subject.role, Some(Role::Admin));
    assert_eq!(resolution.subject.email, "b@y.com");
}

#[tokio::test]
async fn federated_signup_creates_a_verified_account() {
    let h = harness().await;
    let profile = FederatedProfile {
        provider: "kakao".to_string(),
        provider_user_id: "k42".to_string(),
        email: "new@z.com".to_string(),
        name: "New".to_string(),
    };

    let resolution = h
        .auth
        .resolve_federated_login(profile.clone())
        .await
        .expect("resolve");
    assert!(resolution.is_new_account);

    let pair = h
        .auth
        .complete_federated_signup(profile.clone(), "01012345678")
        .await
        .expect("signup");
    let claims = h.auth.verify_access(&pair.access_token).await.expect("verify");
    assert_eq!(claims.email, "new@z.com");

    let again = h.auth.complete_federated_signup(profile, "01012345678").await;
    assert!(matches!(again, Err(AuthError::InvalidRequest(_))));
}

#[tokio::test]
async fn second_login_ends_the_first_session() {
    let h = harness().await;

    let first = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("first login");
    let _second = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "5.6.7.8")
        .await
        .expect("second login");

    let result = h.auth.refresh(&first.refresh_token, "1.2.3.4").await;
    assert_eq!(result.unwrap_err(), AuthError::InvalidToken);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_never_exceed_capacity() {
    let h = harness().await;

    let mut tasks = JoinSet::new();
    for _ in 0..40 {
        let auth = h.auth.clone();
        tasks.spawn(async move { auth.check_signup("7.7.7.7").await.is_ok() });
    }

    let mut allowed = 0;
    while let Some(result) = tasks.join_next().await {
        if result.expect("task") {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_hold_during_store_outage() {
    let h = harness().await;
    h.store.set_available(false);

    let mut tasks = JoinSet::new();
    for _ in 0..40 {
        let auth = h.auth.clone();
        tasks.spawn(async move { auth.check_signup("7.7.7.7").await.is_ok() });
    }

    let mut allowed = 0;
    while let Some(result) = tasks.join_next().await {
        if result.expect("task") {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotation_has_one_winner() {
    let h = harness().await;
    let pair = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");

    let mut tasks = JoinSet::new();
    for i in 0..8 {
        let auth = h.auth.clone();
        let token = pair.refresh_token.clone();
        tasks.spawn(async move { auth.refresh(&token, &format!("10.0.0.{i}")).await });
    }

    let mut winners = 0;
    while let Some(result) = tasks.join_next().await {
        match result.expect("task") {
            Ok(_) => winners += 1,
            Err(err) => assert_eq!(err, AuthError::InvalidToken),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn unreachable_store_rejects_access_tokens() {
    let h = harness().await;
    let pair = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");

    h.store.set_available(false);
    assert_eq!(
        h.auth.verify_access(&pair.access_token).await.unwrap_err(),
        AuthError::InvalidToken
    );
    // revocation status unknown, so the refresh token is refused too
    assert_eq!(
        h.auth
            .refresh(&pair.refresh_token, "1.2.3.4")
            .await
            .unwrap_err(),
        AuthError::InvalidToken
    );
    assert_eq!(
        h.auth
            .login("b@y.com", &secret("Other#456"), "1.2.3.4")
            .await
            .unwrap_err(),
        AuthError::Unavailable
    );

    h.store.set_available(true);
    h.auth
        .verify_access(&pair.access_token)
        .await
        .expect("valid again once the store is back");
}

#[tokio::test]
async fn failed_logins_take_at_least_the_floor() {
    let h = harness().await;

    for (email, password) in [
        ("a@x.com", "wrong"),
        ("nobody@x.com", "Secret#123"),
        ("", ""),
    ] {
        let started = Instant::now();
        let result = h.auth.login(email, &secret(password), "3.3.3.3").await;
        assert_eq!(result.unwrap_err(), AuthError::InvalidCredentials);
        assert!(started.elapsed() >= FLOOR, "{email} returned too fast");
    }
}

#[tokio::test]
async fn logout_revokes_both_tokens() {
    let h = harness().await;
    let pair = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");

    h.auth
        .logout(
            Some(&pair.access_token),
            Some(&pair.refresh_token),
            "1.2.3.4",
        )
        .await;

    assert_eq!(
        h.auth.verify_access(&pair.access_token).await.unwrap_err(),
        AuthError::InvalidToken
    );
    assert_eq!(
        h.auth
            .refresh(&pair.refresh_token, "1.2.3.4")
            .await
            .unwrap_err(),
        AuthError::InvalidToken
    );

    // garbage and repeats are ignored
    h.auth.logout(Some("garbage"), None, "1.2.3.4").await;
    h.auth
        .logout(None, Some(&pair.refresh_token), "1.2.3.4")
        .await;
}

#[tokio::test]
async fn revoke_all_tokens_cuts_every_session() {
    let h = harness().await;
    let pair = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");
    let claims = h.auth.verify_access(&pair.access_token).await.expect("verify");

    h.auth
        .revoke_all_tokens(&Subject {
            id: claims.subject_id,
            email: claims.email.clone(),
        })
        .await;

    assert_eq!(
        h.auth.verify_access(&pair.access_token).await.unwrap_err(),
        AuthError::InvalidToken
    );
    assert_eq!(
        h.auth
            .refresh(&pair.refresh_token, "1.2.3.4")
            .await
            .unwrap_err(),
        AuthError::InvalidToken
    );
}

#[tokio::test]
async fn profile_changes_show_after_account_updated() {
    let h = harness().await;
    let pair = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");
    let before = h.auth.verify_access(&pair.access_token).await.expect("verify");
    assert_eq!(before.role, Role::User);

    h.accounts
        .update_profile(before.subject_id, Role::Admin, "Boss")
        .await
        .expect("update");
    h.auth
        .account_updated(&Subject {
            id: before.subject_id,
            email: before.email.clone(),
        })
        .await;

    let after = h.auth.verify_access(&pair.access_token).await.expect("verify");
    assert_eq!(after.role, Role::Admin);
    assert_eq!(after.display_name, "Boss");
    assert!(after.authorities.contains(&"ROLE_ADMIN".to_string()));
}

#[tokio::test]
async fn account_updated_reaches_every_instance() {
    let h = harness().await;
    let other = second_instance(&h);
    let pair = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");

    let before = other.verify_access(&pair.access_token).await.expect("verify");
    assert_eq!(before.role, Role::User);
    h.auth.verify_access(&pair.access_token).await.expect("verify");

    h.accounts
        .update_profile(before.subject_id, Role::Admin, "Boss")
        .await
        .expect("update");
    h.auth
        .account_updated(&Subject {
            id: before.subject_id,
            email: before.email.clone(),
        })
        .await;

    for instance in [h.auth.as_ref(), &other] {
        let after = instance
            .verify_access(&pair.access_token)
            .await
            .expect("verify");
        assert_eq!(after.role, Role::Admin);
        assert_eq!(after.display_name, "Boss");
    }
}

#[tokio::test]
async fn bulk_updates_drop_every_cached_profile() {
    let h = harness().await;
    let a = h
        .auth
        .login("a@x.com", &secret("Secret#123"), "1.2.3.4")
        .await
        .expect("login");
    let b = h
        .auth
        .login("b@y.com", &secret("Other#456"), "1.2.3.4")
        .await
        .expect("login");
    let a_before = h.auth.verify_access(&a.access_token).await.expect("verify");
    let b_before = h.auth.verify_access(&b.access_token).await.expect("verify");

    h.accounts
        .update_profile(a_before.subject_id, Role::Admin, "A")
        .await
        .expect("update");
    h.accounts
        .update_profile(b_before.subject_id, Role::User, "B")
        .await
        .expect("update");
    h.auth.all_accounts_updated().await;

    assert_eq!(
        h.auth.verify_access(&a.access_token).await.expect("verify").role,
        Role::Admin
    );
    assert_eq!(
        h.auth.verify_access(&b.access_token).await.expect("verify").role,
        Role::User
    );
}

fn signup_request(email: &str, code: &SecretString) -> LocalSignup {
    LocalSignup {
        email: email.to_string(),
        display_name: "New User".to_string(),
        phone: "01012345678".to_string(),
        password: secret("Fresh#789"),
        verification_code: code.clone(),
    }
}

#[tokio::test]
async fn signup_with_emailed_code_creates_a_loginable_account() {
    let h = harness().await;
    let code = h
        .auth
        .send_verification_code(" New@X.com", "1.2.3.4")
        .await
        .expect("code");

    // codes are never below 100000
    let wrong = secret("000000");
    assert_eq!(
        h.auth
            .signup(signup_request("new@x.com", &wrong), "1.2.3.4")
            .await
            .unwrap_err(),
        AuthError::InvalidVerificationCode
    );

    let subject = h
        .auth
        .signup(signup_request("new@x.com", &code), "1.2.3.4")
        .await
        .expect("signup");
    assert_eq!(subject.email, "new@x.com");

    let stored = h
        .accounts
        .find_by_id(subject.id)
        .await
        .expect("lookup")
        .expect("account");
    assert!(stored.verified);
    assert_eq!(stored.phone.as_deref(), Some("010-1234-5678"));

    h.auth
        .login("new@x.com", &secret("Fresh#789"), "1.2.3.4")
        .await
        .expect("login");

    // the code was spent and the account exists now
    assert_eq!(
        h.auth
            .signup(signup_request("new@x.com", &code), "1.2.3.4")
            .await
            .unwrap_err(),
        AuthError::InvalidRequest("account already exists")
    );
}

#[tokio::test]
async fn signup_rejects_existing_email_and_weak_password_without_spending_the_code() {
    let h = harness().await;
    let code = h
        .auth
        .send_verification_code("c@x.com", "1.2.3.4")
        .await
        .expect("code");

    let mut weak = signup_request("c@x.com", &code);
    weak.password = secret("password");
    assert!(matches!(
        h.auth.signup(weak, "1.2.3.4").await,
        Err(AuthError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.auth
            .signup(signup_request("a@x.com", &code), "1.2.3.4")
            .await,
        Err(AuthError::InvalidRequest("account already exists"))
    ));

    h.auth
        .signup(signup_request("c@x.com", &code), "1.2.3.4")
        .await
        .expect("signup");
}

#[tokio::test]
async fn verification_flows_are_rate_limited() {
    let h = harness().await;
    for _ in 0..3 {
        h.auth
            .send_verification_code("d@x.com", "4.4.4.4")
            .await
            .expect("code");
    }
    assert!(matches!(
        h.auth.send_verification_code("d@x.com", "4.4.4.4").await,
        Err(AuthError::RateLimitExceeded { .. })
    ));
    assert!(matches!(
        h.auth.send_verification_code("not-an-email", "5.5.5.5").await,
        Err(AuthError::InvalidRequest(_))
    ));

    // verify-code allows five guesses per email
    let guess = secret("000000");
    for i in 0..5 {
        assert_eq!(
            h.auth
                .signup(signup_request("d@x.com", &guess), &format!("6.6.6.{i}"))
                .await
                .unwrap_err(),
            AuthError::InvalidVerificationCode
        );
    }
    assert!(matches!(
        h.auth
            .signup(signup_request("d@x.com", &guess), "6.6.6.9")
            .await,
        Err(AuthError::RateLimitExceeded { .. })
    ));
}

#[tokio::test]
async fn unknown_and_wrong_password_timings_are_indistinguishable() {
    let h = unlimited_harness().await;
    let trials = 12_u32;
    let mut known = Duration::ZERO;
    let mut unknown = Duration::ZERO;

    for i in 0..trials {
        let ip = format!("172.16.{i}.1");

        let started = Instant::now();
        let _ = h.auth.login("a@x.com", &secret("wrong"), &ip).await;
        known += started.elapsed();

        let started = Instant::now();
        let _ = h
            .auth
            .login(&format!("ghost{i}@x.com"), &secret("wrong"), &ip)
            .await;
        unknown += started.elapsed();
    }

    let known = known / trials;
    let unknown = unknown / trials;
    let gap = known.abs_diff(unknown);
    assert!(known >= FLOOR && unknown >= FLOOR);
    assert!(gap < FLOOR / 2, "mean gap {gap:?} between {known:?} and {unknown:?}");
}
