//! OAuth 1.0a HMAC-SHA1 request signing for dual-credential platforms.
//!
//! Twitter requires an app-level OAuth 1.0a credential for media upload
//! alongside the OAuth 2.0 user credential used everywhere else. Grounded
//! on the signing logic in `grasslandnetwork-cliptions/crates/twitter-api`.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// The app-level OAuth 1.0a credential quad (spec §6's
/// `TWITTER_API_KEY`/`_API_SECRET`/`_ACCESS_TOKEN`/`_ACCESS_TOKEN_SECRET`).
#[derive(Debug, Clone)]
pub struct Oauth1Credential {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

/// Build the `Authorization: OAuth ...` header value for one request.
///
/// `query_params` is the already-decoded `key=value&...` query string, if
/// the request has one; it is folded into the signature base string per
/// the OAuth 1.0a spec but never appears in the header itself.
pub fn sign_request(
    credential: &Oauth1Credential,
    method: &str,
    base_url: &str,
    query_params: Option<&str>,
) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
        .to_string();
    let nonce = random_nonce();

    let mut oauth_params: BTreeMap<&str, String> = BTreeMap::new();
    oauth_params.insert("oauth_consumer_key", credential.api_key.clone());
    oauth_params.insert("oauth_token", credential.access_token.clone());
    oauth_params.insert("oauth_signature_method", "HMAC-SHA1".to_string());
    oauth_params.insert("oauth_timestamp", timestamp);
    oauth_params.insert("oauth_nonce", nonce);
    oauth_params.insert("oauth_version", "1.0".to_string());

    let mut all_params: BTreeMap<String, String> = oauth_params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();

    if let Some(query_str) = query_params {
        for param in query_str.split('&').filter(|p| !p.is_empty()) {
            if let Some((key, value)) = param.split_once('=') {
                let decoded_key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
                let decoded_value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
                all_params.insert(decoded_key.into_owned(), decoded_value.into_owned());
            }
        }
    }

    let param_string = all_params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        urlencoding::encode(base_url),
        urlencoding::encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        urlencoding::encode(&credential.api_secret),
        urlencoding::encode(&credential.access_token_secret)
    );

    let mut mac =
        HmacSha1::new_from_slice(signing_key.as_bytes()).expect("hmac accepts any key length");
    mac.update(base_string.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

    oauth_params.insert("oauth_signature", signature);

    let header_params: Vec<String> = oauth_params
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();

    format!("OAuth {}", header_params.join(", "))
}

fn random_nonce() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..32).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}
