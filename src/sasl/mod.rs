//! SASL negotiation helpers.
//!
//! Challenges and responses are comma-separated `key=value` maps, with
//! optionally double-quoted values, transported as base64 text.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::AuthError;

pub(crate) mod digest_md5;

/// Decode a base64 challenge into its key/value map.
pub(crate) fn decode_challenge(text: &str) -> Result<HashMap<String, String>, AuthError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| AuthError::Challenge(e.to_string()))?;
    let decoded = String::from_utf8(bytes).map_err(|e| AuthError::Challenge(e.to_string()))?;
    Ok(parse_pairs(&decoded))
}

/// Parse `key1=value1,key2="value2",…`. Keys are lower-cased; empty keys
/// and values are dropped.
pub(crate) fn parse_pairs(input: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if rest.is_empty() {
            break;
        }
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_ascii_lowercase();
        rest = &rest[eq + 1..];
        let value = if let Some(quoted) = rest.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => {
                    let value = quoted[..end].to_owned();
                    rest = &quoted[end + 1..];
                    value
                }
                None => {
                    let value = quoted.to_owned();
                    rest = "";
                    value
                }
            }
        } else {
            match rest.find(',') {
                Some(end) => {
                    let value = rest[..end].to_owned();
                    rest = &rest[end..];
                    value
                }
                None => {
                    let value = rest.to_owned();
                    rest = "";
                    value
                }
            }
        };
        if !key.is_empty() && !value.is_empty() {
            map.insert(key, value);
        }
    }
    map
}

/// Inverse of [`parse_pairs`]: pack pairs in order, skipping empty or
/// `""` values, and base64-encode the result.
pub(crate) fn pack_pairs(pairs: &[(&str, String)]) -> String {
    let terms: Vec<String> = pairs
        .iter()
        .filter(|(key, value)| !key.is_empty() && !value.is_empty() && value != "\"\"")
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    BASE64.encode(terms.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_bare_values() {
        let map = parse_pairs(r#"realm="example.net",nonce="abc,def",qop=auth,charset=utf-8"#);
        assert_eq!(map["realm"], "example.net");
        assert_eq!(map["nonce"], "abc,def");
        assert_eq!(map["qop"], "auth");
        assert_eq!(map["charset"], "utf-8");
    }

    #[test]
    fn keys_are_lowercased() {
        let map = parse_pairs(r#"Nonce="x",QOP=auth"#);
        assert_eq!(map["nonce"], "x");
        assert_eq!(map["qop"], "auth");
    }

    #[test]
    fn packing_skips_empty_values() {
        let packed = pack_pairs(&[
            ("realm", "\"\"".to_owned()),
            ("nc", "00000001".to_owned()),
            ("qop", "auth".to_owned()),
        ]);
        let decoded = String::from_utf8(
            base64::engine::general_purpose::STANDARD
                .decode(packed)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(decoded, "nc=00000001,qop=auth");
    }

    #[test]
    fn challenge_round_trip() {
        let encoded = BASE64.encode(r#"nonce="OA6MG9tEQGm2hh",qop="auth""#);
        let map = decode_challenge(&encoded).unwrap();
        assert_eq!(map["nonce"], "OA6MG9tEQGm2hh");
        assert_eq!(map["qop"], "auth");
    }
}
