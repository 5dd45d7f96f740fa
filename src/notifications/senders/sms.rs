use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{NotificationSender, SenderError, object_content, parse_config, read_json_response};
use crate::notifications::models::SmsConfig;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_ENDPOINT: &str = "https://dysmsapi.aliyuncs.com";
const ACTION: &str = "SendSms";
const API_VERSION: &str = "2017-05-25";
const ALGORITHM: &str = "ACS3-HMAC-SHA256";
const REQUIRED_CONTENT_FIELDS: [&str; 3] = ["phone_numbers", "sign_name", "template_code"];

/// A sender for Aliyun SMS (Dysms `SendSms`), signed with ACS3-HMAC-SHA256.
pub struct SmsSender {
    client: Client,
}

impl SmsSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// The `SendSms` query parameters extracted from the content object.
/// Keys other than the three required ones become template variables.
fn request_params(content: &Map<String, Value>) -> Result<BTreeMap<&'static str, String>, SenderError> {
    for field in REQUIRED_CONTENT_FIELDS {
        if !content.contains_key(field) {
            return Err(SenderError::InvalidContent(format!(
                "content is missing required field: {field}"
            )));
        }
    }

    let template_vars: BTreeMap<&str, String> = content
        .iter()
        .filter(|(key, _)| !REQUIRED_CONTENT_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.as_str(), param_string(value)))
        .collect();
    let template_param = serde_json::to_string(&template_vars)
        .map_err(|e| SenderError::InvalidContent(e.to_string()))?;

    let mut params = BTreeMap::new();
    params.insert("PhoneNumbers", param_string(&content["phone_numbers"]));
    params.insert("SignName", param_string(&content["sign_name"]));
    params.insert("TemplateCode", param_string(&content["template_code"]));
    params.insert("TemplateParam", template_param);
    Ok(params)
}

/// Stringifies a content value; lists of phone numbers are comma-joined.
fn param_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(param_string).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

fn canonical_query(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns the canonical request and the `SignedHeaders` list.
/// Header names must already be lowercase; the map keeps them sorted.
fn canonical_request(query: &str, headers: &BTreeMap<String, String>, hashed_payload: &str) -> (String, String) {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical = format!("POST\n/\n{query}\n{canonical_headers}\n{signed_headers}\n{hashed_payload}");
    (canonical, signed_headers)
}

fn signature(secret: &str, canonical_request: &str) -> String {
    let string_to_sign = format!(
        "{ALGORITHM}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn host_header(url: &Url) -> Result<String, SenderError> {
    let host = url
        .host_str()
        .ok_or_else(|| SenderError::InvalidConfiguration("endpoint has no host".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[async_trait]
impl NotificationSender for SmsSender {
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError> {
        let config: SmsConfig = parse_config(config)?;
        let params = request_params(&object_content(content)?)?;

        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        let query = canonical_query(&params);
        let url = Url::parse(&format!("{endpoint}/?{query}"))
            .map_err(|_| SenderError::InvalidConfiguration("endpoint is not a valid URL".to_string()))?;

        let hashed_payload = hex::encode(Sha256::digest(b""));
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host_header(&url)?);
        headers.insert("x-acs-action".to_string(), ACTION.to_string());
        headers.insert("x-acs-content-sha256".to_string(), hashed_payload.clone());
        headers.insert(
            "x-acs-date".to_string(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        headers.insert("x-acs-signature-nonce".to_string(), uuid::Uuid::new_v4().to_string());
        headers.insert("x-acs-version".to_string(), API_VERSION.to_string());

        let (canonical, signed_headers) = canonical_request(&query, &headers, &hashed_payload);
        let authorization = format!(
            "{ALGORITHM} Credential={},SignedHeaders={signed_headers},Signature={}",
            config.access_key_id,
            signature(&config.access_key_secret, &canonical)
        );

        let mut request = self.client.post(url).header("authorization", authorization);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let result = read_json_response(response, "SMS provider").await?;

        match result.get("Code").and_then(Value::as_str) {
            Some("OK") => Ok(()),
            _ => Err(SenderError::SendFailed(format!(
                "SMS send failed: {}",
                result.get("Message").and_then(Value::as_str).unwrap_or("unknown error")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_regex, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn template_variables_are_stringified_and_separated() {
        let content = object_content(&json!({
            "phone_numbers": "13800000000",
            "sign_name": "阿里云",
            "template_code": "SMS_1",
            "code": 1234
        }))
        .unwrap();
        let params = request_params(&content).unwrap();
        assert_eq!(params["TemplateParam"], r#"{"code":"1234"}"#);
        assert_eq!(params["PhoneNumbers"], "13800000000");
    }

    #[test]
    fn missing_required_content_field_is_named() {
        let content = object_content(&json!({"phone_numbers": "1", "sign_name": "x"})).unwrap();
        let err = request_params(&content).unwrap_err();
        assert!(err.to_string().contains("template_code"));
    }

    #[test]
    fn signature_matches_reference_value() {
        let mut params = BTreeMap::new();
        params.insert("PhoneNumbers", "13800000000".to_string());
        params.insert("SignName", "阿里云".to_string());
        params.insert("TemplateCode", "SMS_1".to_string());
        params.insert("TemplateParam", r#"{"code":"1234"}"#.to_string());
        let query = canonical_query(&params);
        assert_eq!(
            query,
            "PhoneNumbers=13800000000&SignName=%E9%98%BF%E9%87%8C%E4%BA%91&TemplateCode=SMS_1&TemplateParam=%7B%22code%22%3A%221234%22%7D"
        );

        let headers: BTreeMap<String, String> = [
            ("host", "dysmsapi.aliyuncs.com"),
            ("x-acs-action", "SendSms"),
            ("x-acs-content-sha256", EMPTY_SHA256),
            ("x-acs-date", "2024-01-01T00:00:00Z"),
            ("x-acs-signature-nonce", "nonce-1"),
            ("x-acs-version", "2017-05-25"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let (canonical, signed_headers) = canonical_request(&query, &headers, EMPTY_SHA256);
        assert_eq!(
            signed_headers,
            "host;x-acs-action;x-acs-content-sha256;x-acs-date;x-acs-signature-nonce;x-acs-version"
        );
        assert_eq!(
            signature("testsecret", &canonical),
            "6ee1f2d60ae2e07bae57820affb919504dc1ea15028d68f047a60f84e6432b23"
        );
    }

    #[tokio::test]
    async fn signed_request_succeeds_on_ok_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(query_param("PhoneNumbers", "13800000000"))
            .and(query_param("TemplateCode", "SMS_1"))
            .and(query_param("TemplateParam", r#"{"code":"1234"}"#))
            .and(header("x-acs-action", "SendSms"))
            .and(header("x-acs-version", "2017-05-25"))
            .and(header_regex(
                "authorization",
                "^ACS3-HMAC-SHA256 Credential=LTAItest,SignedHeaders=host;x-acs-action;x-acs-content-sha256;x-acs-date;x-acs-signature-nonce;x-acs-version,Signature=[0-9a-f]{64}$",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Code": "OK", "Message": "OK"})))
            .expect(1)
            .mount(&server)
            .await;

        let config = json!({
            "access_key_id": "LTAItest",
            "access_key_secret": "secret",
            "endpoint": server.uri()
        });
        let content = json!({
            "phone_numbers": "13800000000",
            "sign_name": "Acme",
            "template_code": "SMS_1",
            "code": "1234"
        });
        SmsSender::new(Client::new()).send(&config, &content).await.unwrap();
    }

    #[tokio::test]
    async fn provider_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"Code": "isv.BUSINESS_LIMIT_CONTROL", "Message": "触发分钟级流控"}),
            ))
            .mount(&server)
            .await;

        let config = json!({"access_key_id": "a", "access_key_secret": "b", "endpoint": server.uri()});
        let content = json!({"phone_numbers": "1", "sign_name": "s", "template_code": "t"});
        let err = SmsSender::new(Client::new()).send(&config, &content).await.unwrap_err();
        assert!(err.to_string().contains("触发分钟级流控"));
    }

    #[tokio::test]
    async fn missing_access_key_is_a_config_error() {
        let content = json!({"phone_numbers": "1", "sign_name": "s", "template_code": "t"});
        let err = SmsSender::new(Client::new())
            .send(&json!({"access_key_id": "a"}), &content)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access_key_secret"));
    }
}
