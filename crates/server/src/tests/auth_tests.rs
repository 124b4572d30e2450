use super::*;
use chrono::Duration;
use jsonwebtoken::{decode, DecodingKey, Validation};

#[test]
fn minted_token_verifies_with_subject_and_expiry() {
    let token = mint_session_token("devsecret", "stage-left", Duration::minutes(5)).expect("token");
    let session = SessionVerifier::new("devsecret")
        .verify(&token)
        .expect("session");

    assert_eq!(session.subject, "stage-left");
    let expires_at = session.expires_at.expect("expiry");
    assert!(expires_at > Utc::now());
    assert!(expires_at <= Utc::now() + Duration::minutes(5));
}

#[test]
fn token_claims_are_plain_hs256() {
    let token = mint_session_token("devsecret", "operator", Duration::seconds(60)).expect("token");
    let decoded = decode::<serde_json::Value>(
        &token,
        &DecodingKey::from_secret(b"devsecret"),
        &Validation::default(),
    )
    .expect("decode");

    assert_eq!(decoded.claims["sub"], "operator");
    assert!(decoded.claims["exp"].as_i64().expect("exp") > decoded.claims["iat"].as_i64().expect("iat"));
}

#[test]
fn expired_token_is_rejected() {
    let token = mint_session_token("devsecret", "operator", Duration::seconds(-5)).expect("token");
    let err = SessionVerifier::new("devsecret")
        .verify(&token)
        .expect_err("expired");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[test]
fn token_signed_with_another_secret_is_rejected() {
    let token = mint_session_token("other", "operator", Duration::minutes(1)).expect("token");
    let err = SessionVerifier::new("devsecret")
        .verify(&token)
        .expect_err("bad signature");
    assert_eq!(err.code, ErrorCode::Unauthorized);
}
