//! Refresh-session lifecycle: issue, rotate, revoke, retain.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{Harness, MemRefreshTokens};
use keyward_core::AuthError;
use keyward_core::refresh::{DeviceInfo, REASON_SUPERSEDED, RefreshTokenService, hash_token};
use keyward_core::users::{AccountStatus, UserRecord};

struct Fixture {
    h: Harness,
    repo: Arc<MemRefreshTokens>,
    sessions: RefreshTokenService,
    user: UserRecord,
}

async fn fixture() -> Fixture {
    let h = Harness::new();
    let user = h.active_user("jane@example.com").await;
    let repo = Arc::new(MemRefreshTokens::default());
    let sessions = RefreshTokenService::new(repo.clone(), h.auth.clone());
    Fixture {
        h,
        repo,
        sessions,
        user,
    }
}

fn phone() -> DeviceInfo {
    DeviceInfo {
        device_id: Some("phone-1".into()),
        device_name: Some("Jane's phone".into()),
        device_type: Some("ios".into()),
        user_agent: Some("App/1.0".into()),
        ip_address: Some("203.0.113.7".into()),
    }
}

fn laptop() -> DeviceInfo {
    DeviceInfo {
        device_id: Some("laptop-1".into()),
        device_type: Some("web".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn only_the_hash_is_stored() {
    let f = fixture().await;
    let issued = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();

    let rows = f.repo.all();
    assert_eq!(rows.len(), 1);
    assert_ne!(rows[0].token_hash, issued.refresh_token);
    assert_eq!(rows[0].token_hash, hash_token(&issued.refresh_token));
    assert_eq!(rows[0].device_id, "phone-1");
}

#[tokio::test]
async fn remember_me_extends_lifetime() {
    let f = fixture().await;
    let short = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();
    let long = f
        .sessions
        .create_refresh_token(f.user.id, &laptop(), true)
        .await
        .unwrap();

    let now = Utc::now();
    assert!(short.expires_at - now <= Duration::days(7));
    assert!(short.expires_at - now > Duration::days(6));
    assert!(long.expires_at - now > Duration::days(29));
}

#[tokio::test]
async fn rotation_invalidates_the_old_secret() {
    let f = fixture().await;
    let issued = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), true)
        .await
        .unwrap();

    let refreshed = f
        .sessions
        .refresh_access_token(&issued.refresh_token, f.user.id)
        .await
        .unwrap();
    assert_ne!(refreshed.refresh_token, issued.refresh_token);
    assert_eq!(refreshed.expires_at, issued.expires_at);
    let claims = f.h.auth.issuer().verify(&refreshed.access_token.token).unwrap();
    assert_eq!(claims.user_id, f.user.id);

    assert!(matches!(
        f.sessions
            .refresh_access_token(&issued.refresh_token, f.user.id)
            .await,
        Err(AuthError::RefreshTokenNotFound)
    ));
    f.sessions
        .refresh_access_token(&refreshed.refresh_token, f.user.id)
        .await
        .unwrap();

    let rows = f.repo.all();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].last_used_at.is_some());
}

#[tokio::test]
async fn concurrent_rotations_have_one_winner() {
    let f = fixture().await;
    let issued = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        f.sessions.refresh_access_token(&issued.refresh_token, f.user.id),
        f.sessions.refresh_access_token(&issued.refresh_token, f.user.id),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(AuthError::RefreshTokenNotFound)));
}

#[tokio::test]
async fn unknown_empty_and_foreign_tokens_are_not_found() {
    let f = fixture().await;
    let issued = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();

    for raw in ["", "   ", "made-up-token"] {
        assert!(matches!(
            f.sessions.refresh_access_token(raw, f.user.id).await,
            Err(AuthError::RefreshTokenNotFound)
        ));
    }

    let other = f.h.active_user("john@example.com").await;
    assert!(matches!(
        f.sessions
            .refresh_access_token(&issued.refresh_token, other.id)
            .await,
        Err(AuthError::RefreshTokenNotFound)
    ));
}

#[tokio::test]
async fn expired_session_cannot_rotate() {
    let f = fixture().await;
    let issued = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();
    f.repo.set_expires_at("phone-1", Utc::now() - Duration::seconds(1));

    assert!(matches!(
        f.sessions
            .refresh_access_token(&issued.refresh_token, f.user.id)
            .await,
        Err(AuthError::RefreshTokenExpired)
    ));
    assert!(f.sessions.get_user_devices(f.user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn new_login_on_same_device_supersedes() {
    let f = fixture().await;
    let first = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();
    let second = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();

    let devices = f.sessions.get_user_devices(f.user.id).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, "phone-1");
    assert_eq!(devices[0].device_name.as_deref(), Some("Jane's phone"));

    let old = f
        .repo
        .all()
        .into_iter()
        .find(|r| r.token_hash == hash_token(&first.refresh_token))
        .unwrap();
    assert_eq!(old.revoked_reason.as_deref(), Some(REASON_SUPERSEDED));
    assert!(matches!(
        f.sessions
            .refresh_access_token(&first.refresh_token, f.user.id)
            .await,
        Err(AuthError::RefreshTokenRevoked)
    ));
    f.sessions
        .refresh_access_token(&second.refresh_token, f.user.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn simultaneous_logins_on_one_device_leave_one_active_session() {
    let f = fixture().await;
    let (phone_a, phone_b) = (phone(), phone());
    let (a, b) = tokio::join!(
        f.sessions.create_refresh_token(f.user.id, &phone_a, false),
        f.sessions.create_refresh_token(f.user.id, &phone_b, false),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let rows = f.repo.all();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.iter().filter(|r| !r.is_revoked).count(), 1);
    assert_eq!(f.sessions.get_user_devices(f.user.id).await.unwrap().len(), 1);

    let outcomes = [
        f.sessions.refresh_access_token(&a.refresh_token, f.user.id).await,
        f.sessions.refresh_access_token(&b.refresh_token, f.user.id).await,
    ];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(AuthError::RefreshTokenRevoked)))
    );
}

#[tokio::test]
async fn derived_device_ids_supersede_repeat_logins() {
    let f = fixture().await;
    let browser = DeviceInfo {
        user_agent: Some("Mozilla/5.0".into()),
        ip_address: Some("198.51.100.4".into()),
        ..Default::default()
    };
    f.sessions
        .create_refresh_token(f.user.id, &browser, false)
        .await
        .unwrap();
    f.sessions
        .create_refresh_token(f.user.id, &browser, false)
        .await
        .unwrap();
    assert_eq!(f.sessions.get_user_devices(f.user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn revoking_one_device_leaves_others() {
    let f = fixture().await;
    let on_phone = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();
    let on_laptop = f
        .sessions
        .create_refresh_token(f.user.id, &laptop(), false)
        .await
        .unwrap();

    f.sessions
        .revoke_device_token(f.user.id, "phone-1", Some("lost device"))
        .await
        .unwrap();
    assert!(matches!(
        f.sessions
            .refresh_access_token(&on_phone.refresh_token, f.user.id)
            .await,
        Err(AuthError::RefreshTokenRevoked)
    ));
    f.sessions
        .refresh_access_token(&on_laptop.refresh_token, f.user.id)
        .await
        .unwrap();

    assert!(matches!(
        f.sessions.revoke_device_token(f.user.id, "phone-1", None).await,
        Err(AuthError::RefreshTokenNotFound)
    ));
}

#[tokio::test]
async fn revoke_all_is_terminal_for_every_session() {
    let f = fixture().await;
    let tokens = [
        f.sessions
            .create_refresh_token(f.user.id, &phone(), false)
            .await
            .unwrap(),
        f.sessions
            .create_refresh_token(f.user.id, &laptop(), true)
            .await
            .unwrap(),
    ];

    assert_eq!(
        f.sessions.revoke_all_user_tokens(f.user.id, None).await.unwrap(),
        2
    );
    for issued in &tokens {
        assert!(matches!(
            f.sessions
                .refresh_access_token(&issued.refresh_token, f.user.id)
                .await,
            Err(AuthError::RefreshTokenRevoked)
        ));
    }
    assert!(f.sessions.get_user_devices(f.user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn suspended_user_cannot_rotate() {
    let f = fixture().await;
    let issued = f
        .sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();
    let mut record = f.h.users.get(f.user.id).unwrap();
    record.status = AccountStatus::Suspended;
    f.h.users.put(record);

    assert!(matches!(
        f.sessions
            .refresh_access_token(&issued.refresh_token, f.user.id)
            .await,
        Err(AuthError::AccountNotActive(AccountStatus::Suspended))
    ));
    // The session was not rotated.
    assert_eq!(
        f.repo.all()[0].token_hash,
        hash_token(&issued.refresh_token)
    );
}

#[tokio::test]
async fn retention_cleans_expired_and_old_revoked_rows() {
    let f = fixture().await;
    f.sessions
        .create_refresh_token(f.user.id, &phone(), false)
        .await
        .unwrap();
    f.sessions
        .create_refresh_token(f.user.id, &laptop(), false)
        .await
        .unwrap();
    let tablet = DeviceInfo {
        device_id: Some("tablet-1".into()),
        ..Default::default()
    };
    f.sessions
        .create_refresh_token(f.user.id, &tablet, false)
        .await
        .unwrap();

    f.repo.set_expires_at("phone-1", Utc::now() - Duration::days(1));
    f.sessions
        .revoke_device_token(f.user.id, "laptop-1", None)
        .await
        .unwrap();
    f.repo.set_revoked_at("laptop-1", Utc::now() - Duration::days(45));

    assert_eq!(f.sessions.delete_expired().await.unwrap(), 1);
    assert_eq!(f.sessions.delete_revoked(Duration::days(30)).await.unwrap(), 1);

    let remaining = f.repo.all();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].device_id, "tablet-1");
}
