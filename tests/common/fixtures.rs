//! Mock Salesforce org for end-to-end tests

use serde_json::{Value, json};
use sf_report_export::{Config, Credentials, Environment};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Session id handed out by the mock login
pub const SESSION_ID: &str = "00D000000000001!AQ0AQMockSession";

/// A small CSV body as the export endpoint returns it
pub const SAMPLE_CSV: &str =
    "\"Opportunity Name\",\"Stage\",\"Amount\"\n\"Acme Renewal\",\"Closed Won\",\"1200\"\n";

/// Listing path for the default negotiated version
pub const LISTING_PATH: &str = "/services/data/v58.0/analytics/reports";

const LOGIN_FAULT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:sf="urn:fault.partner.soap.sforce.com">
  <soapenv:Body>
    <soapenv:Fault>
      <faultcode>sf:INVALID_LOGIN</faultcode>
      <faultstring>INVALID_LOGIN: Invalid username, password, security token; or user locked out.</faultstring>
    </soapenv:Fault>
  </soapenv:Body>
</soapenv:Envelope>"#;

/// Config with short delays so retries and pacing stay fast
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.export.inter_request_delay = Duration::from_millis(1);
    config.http.discovery_timeout = Duration::from_millis(500);
    config.http.login_timeout = Duration::from_secs(5);
    config.http.listing_timeout = Duration::from_secs(5);
    config.http.export_timeout = Duration::from_secs(5);
    config
}

/// Report record as the listing endpoint returns it
pub fn report_record(id: &str, name: &str, format: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "reportFormat": format,
        "url": format!("/services/data/v58.0/analytics/reports/{}", id),
        "describeUrl": format!("/services/data/v58.0/analytics/reports/{}/describe", id),
    })
}

/// Wiremock server impersonating one org
pub struct MockOrg {
    pub server: MockServer,
}

impl MockOrg {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Credentials that log in against this server
    pub fn credentials(&self) -> Credentials {
        Credentials::new("ada@example.com", "hunter2")
            .with_security_token("TOKEN123")
            .with_environment(Environment::Url(
                Url::parse(&self.server.uri()).expect("mock server URI"),
            ))
    }

    fn login_body(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:partner.soap.sforce.com">
  <soapenv:Body>
    <loginResponse>
      <result>
        <serverUrl>{uri}/services/Soap/u/58.0/00D000000000001</serverUrl>
        <sessionId>{sid}</sessionId>
        <userId>005000000000001AAA</userId>
        <userInfo>
          <organizationId>00D000000000001AAA</organizationId>
          <userFullName>Ada Lovelace</userFullName>
          <userId>005000000000001AAA</userId>
        </userInfo>
      </result>
    </loginResponse>
  </soapenv:Body>
</soapenv:Envelope>"#,
            uri = self.server.uri(),
            sid = SESSION_ID
        )
    }

    /// Accept the login and advertise versions 56.0 to 58.0
    pub async fn mount_login(&self) {
        Mock::given(method("POST"))
            .and(path("/services/Soap/u/58.0"))
            .and(header("SOAPAction", "login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(self.login_body()))
            .mount(&self.server)
            .await;
        self.mount_versions(ResponseTemplate::new(200).set_body_json(json!([
            {"label": "Spring '23", "url": "/services/data/v56.0", "version": "56.0"},
            {"label": "Summer '23", "url": "/services/data/v57.0", "version": "57.0"},
            {"label": "Winter '24", "url": "/services/data/v58.0", "version": "58.0"}
        ])))
        .await;
    }

    /// Accept the login but answer capability discovery with `versions`
    pub async fn mount_login_with_versions(&self, versions: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/services/Soap/u/58.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(self.login_body()))
            .mount(&self.server)
            .await;
        self.mount_versions(versions).await;
    }

    async fn mount_versions(&self, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/services/data/"))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Reject the credentials with a SOAP fault
    pub async fn mount_login_fault(&self) {
        Mock::given(method("POST"))
            .and(path("/services/Soap/u/58.0"))
            .respond_with(ResponseTemplate::new(500).set_body_string(LOGIN_FAULT))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Serve `records` from the listing endpoint, expecting `calls` requests
    pub async fn mount_listing(&self, records: Vec<Value>, calls: u64) {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(header("Authorization", format!("Bearer {}", SESSION_ID).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(records)))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve one report export, expecting `calls` requests
    pub async fn mount_report(&self, id: &str, template: ResponseTemplate, calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/{}", id)))
            .and(header("Cookie", format!("sid={}", SESSION_ID).as_str()))
            .respond_with(template)
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve `SAMPLE_CSV` for one report, expecting `calls` requests
    pub async fn mount_csv(&self, id: &str, calls: u64) {
        self.mount_report(
            id,
            ResponseTemplate::new(200).set_body_string(SAMPLE_CSV),
            calls,
        )
        .await;
    }
}
