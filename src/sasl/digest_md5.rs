//! DIGEST-MD5 challenge responder, RFC 2831.

use std::collections::HashMap;

use md5::{Digest, Md5};
use rand::{thread_rng, Rng};

use crate::error::AuthError;
use crate::jid::Jid;

use super::pack_pairs;

/// Outcome of answering the first challenge.
pub(crate) struct DigestResponse {
    /// Base64 payload for the `<response/>` element.
    pub(crate) data: String,
    /// The `rspauth` value the server must present in its second
    /// challenge.
    pub(crate) expected_rspauth: String,
}

/// Answer the server's first DIGEST-MD5 challenge.
pub(crate) fn respond(
    jid: &Jid,
    password: &str,
    challenge: &HashMap<String, String>,
) -> Result<DigestResponse, AuthError> {
    // The server must offer plain authentication; we do not implement
    // auth-int or auth-conf.
    let qop = challenge.get("qop").map(String::as_str).unwrap_or("");
    if !qop
        .split(|c: char| c == ',' || c.is_whitespace())
        .any(|token| token == "auth")
    {
        return Err(AuthError::NoQopAuth);
    }

    let nonce = challenge
        .get("nonce")
        .ok_or_else(|| AuthError::Challenge("missing nonce".to_owned()))?;

    // First whitespace-separated token of the realm; empty is permitted.
    let realm = challenge
        .get("realm")
        .and_then(|realm| realm.split_whitespace().next())
        .unwrap_or("");

    let cnonce = format!("{:016x}", thread_rng().gen::<u64>());
    let charset_utf8 = challenge.get("charset").map(String::as_str) == Some("utf-8");

    Ok(respond_with_cnonce(
        jid,
        password,
        realm,
        nonce,
        &cnonce,
        charset_utf8,
    ))
}

/// The deterministic part of [`respond`], split out so tests can fix the
/// client nonce.
pub(crate) fn respond_with_cnonce(
    jid: &Jid,
    password: &str,
    realm: &str,
    nonce: &str,
    cnonce: &str,
    charset_utf8: bool,
) -> DigestResponse {
    let username = jid.node().unwrap_or_else(|| jid.domain());
    let digest_uri = format!("xmpp/{}", jid.domain());
    let nonce_count = "00000001";

    let response = digest_response(
        username,
        realm,
        password,
        nonce,
        cnonce,
        "AUTHENTICATE",
        &digest_uri,
        nonce_count,
    );
    let expected_rspauth = digest_response(
        username,
        realm,
        password,
        nonce,
        cnonce,
        "",
        &digest_uri,
        nonce_count,
    );

    let quoted = |value: &str| format!("\"{}\"", value);
    let mut pairs = vec![
        ("realm", quoted(realm)),
        ("username", quoted(username)),
        ("nonce", quoted(nonce)),
        ("cnonce", quoted(cnonce)),
        ("nc", nonce_count.to_owned()),
        ("qop", "auth".to_owned()),
        ("digest-uri", quoted(&digest_uri)),
        ("response", response),
    ];
    if charset_utf8 {
        pairs.push(("charset", "utf-8".to_owned()));
    }

    DigestResponse {
        data: pack_pairs(&pairs),
        expected_rspauth,
    }
}

/// The response computation of RFC 2831, section 2.1.2.1:
/// `HEX(KD(HEX(H(A1)), nonce ":" nc ":" cnonce ":" "auth" ":" HEX(H(A2))))`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn digest_response(
    username: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    cnonce: &str,
    authenticate: &str,
    digest_uri: &str,
    nonce_count: &str,
) -> String {
    // A1 starts from the *raw* digest bytes, not their hex form.
    let mut a1 = Md5::digest(format!("{}:{}:{}", username, realm, password)).to_vec();
    a1.extend_from_slice(format!(":{}:{}", nonce, cnonce).as_bytes());
    let ha1 = hex::encode(Md5::digest(&a1));
    let ha2 = hex::encode(Md5::digest(format!("{}:{}", authenticate, digest_uri)));
    hex::encode(Md5::digest(format!(
        "{}:{}:{}:{}:auth:{}",
        ha1, nonce, nonce_count, cnonce, ha2
    )))
}
