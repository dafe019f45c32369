//! Session negotiation: SOAP login plus API version discovery.
//!
//! The handshake is always posted to a fixed SOAP version
//! ([`ProtocolConfig::login_api_version`](crate::config::ProtocolConfig)) so
//! it behaves the same on every tenant generation. Once logged in, the
//! instance is asked which REST versions it supports and the highest one is
//! used for everything that follows. If that query fails for any reason the
//! login version is used instead; the failure is logged, not raised.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{ApiVersion, Credentials, SessionHandle, UserIdentity, wipe};
use crate::utils::{extract_instance_url, xml_escape, xml_unescape};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

/// Longest slice of an unexpected response body quoted in an error
const BODY_EXCERPT_LEN: usize = 500;

/// Fields extracted from a successful SOAP login
#[derive(Clone, Debug)]
pub(crate) struct LoginResult {
    pub(crate) session_id: String,
    pub(crate) server_url: String,
    pub(crate) instance_url: Url,
    pub(crate) user: UserIdentity,
}

/// One entry of the `/services/data/` capability listing
#[derive(Clone, Debug, Deserialize)]
pub struct VersionEntry {
    /// Version number, e.g. "58.0"
    pub version: String,
    /// Release label, e.g. "Summer '23"
    #[serde(default)]
    pub label: Option<String>,
    /// Relative URL of the version root
    #[serde(default)]
    pub url: Option<String>,
}

/// Performs the authentication handshake and produces a [`SessionHandle`]
pub struct SessionNegotiator {
    http_client: reqwest::Client,
    config: Config,
}

impl SessionNegotiator {
    /// Create a negotiator sharing `http_client`
    pub fn new(http_client: reqwest::Client, config: Config) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Log in and negotiate the API version
    ///
    /// Consumes the credentials; their secrets are wiped when this returns,
    /// whether or not the login succeeded.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`] when the credentials are rejected
    /// - [`Error::Network`] / [`Error::Timeout`] when the login endpoint is unreachable
    /// - [`Error::Unavailable`] when the login endpoint answers 429 or 5xx
    /// - [`Error::Protocol`] when the response cannot be interpreted
    pub async fn negotiate(&self, credentials: Credentials) -> Result<SessionHandle> {
        let login = self.login(&credentials).await?;
        drop(credentials);

        info!(
            instance = %login.instance_url,
            user = %login.user.display_name,
            org_id = %login.user.org_id,
            "Logged in"
        );
        debug!(server_url = %login.server_url, "SOAP server URL");

        let api_version = self.negotiate_version(&login.instance_url).await;

        Ok(SessionHandle::new(
            login.session_id,
            login.instance_url,
            api_version,
            login.user,
        ))
    }

    /// Highest supported API version, or the login version when discovery fails
    pub async fn negotiate_version(&self, instance_url: &Url) -> ApiVersion {
        let fallback = self.config.protocol.login_api_version;
        match self.discover_api_version(instance_url).await {
            Ok(version) => {
                info!(%version, "Negotiated API version");
                version
            }
            Err(e) => {
                warn!(
                    error = %e,
                    %fallback,
                    "API version discovery failed, using fallback version"
                );
                fallback
            }
        }
    }

    /// Query the unauthenticated capability endpoint and pick the highest version
    pub async fn discover_api_version(&self, instance_url: &Url) -> Result<ApiVersion> {
        let url = format!(
            "{}/services/data/",
            instance_url.as_str().trim_end_matches('/')
        );
        let timeout = self.config.http.discovery_timeout;

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::from_request(e, "API version discovery", timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "version discovery returned HTTP {}",
                status.as_u16()
            )));
        }

        let entries: Vec<VersionEntry> = response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("invalid version listing: {}", e)))?;

        select_latest_version(&entries)
            .ok_or_else(|| Error::Protocol("version listing is empty".to_string()))
    }

    async fn login(&self, credentials: &Credentials) -> Result<LoginResult> {
        let login_version = self.config.protocol.login_api_version;
        let base = credentials.environment().login_base_url()?;
        let url = format!(
            "{}/services/Soap/u/{}",
            base.as_str().trim_end_matches('/'),
            login_version
        );

        let mut secret = credentials.composed_secret();
        let envelope = build_login_envelope(
            credentials.username(),
            &secret,
            &self.config.export.client_name,
        );
        wipe(&mut secret);

        debug!(%url, username = credentials.username(), "Sending SOAP login");

        let timeout = self.config.http.login_timeout;
        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "text/xml; charset=UTF-8")
            .header("SOAPAction", "login")
            .body(envelope)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::from_request(e, "login", timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::from_request(e, "login", timeout))?;

        parse_login_response(status, &body)
    }
}

/// Highest parseable version in a capability listing
pub fn select_latest_version(entries: &[VersionEntry]) -> Option<ApiVersion> {
    entries
        .iter()
        .filter_map(|entry| match entry.version.parse::<ApiVersion>() {
            Ok(version) => Some(version),
            Err(_) => {
                debug!(version = %entry.version, "Ignoring unparseable API version");
                None
            }
        })
        .max()
}

/// SOAP envelope for the partner `login` call
pub(crate) fn build_login_envelope(username: &str, password: &str, client_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?>
<env:Envelope xmlns:xsd="http://www.w3.org/2001/XMLSchema"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xmlns:env="http://schemas.xmlsoap.org/soap/envelope/"
    xmlns:urn="urn:partner.soap.sforce.com">
  <env:Header>
    <urn:CallOptions>
      <urn:client>{client}</urn:client>
    </urn:CallOptions>
  </env:Header>
  <env:Body>
    <n1:login xmlns:n1="urn:partner.soap.sforce.com">
      <n1:username>{username}</n1:username>
      <n1:password>{password}</n1:password>
    </n1:login>
  </env:Body>
</env:Envelope>"#,
        client = xml_escape(client_name),
        username = xml_escape(username),
        password = xml_escape(password),
    )
}

/// Interpret the login response body
pub(crate) fn parse_login_response(status: u16, body: &str) -> Result<LoginResult> {
    if let Some(fault) = element_value(body, "faultstring")? {
        return Err(Error::Auth(fault));
    }

    if !(200..300).contains(&status) {
        let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
        return Err(if status == 401 || status == 403 {
            Error::Auth(format!("login rejected with HTTP {}", status))
        } else if status == 429 || status >= 500 {
            Error::Unavailable {
                status,
                message: format!("login endpoint unavailable: {}", excerpt),
            }
        } else {
            Error::Protocol(format!("login failed with HTTP {}: {}", status, excerpt))
        });
    }

    let result = element_text(body, "result")?
        .ok_or_else(|| Error::Protocol("login response has no result element".to_string()))?;

    let session_id = element_value(&result, "sessionId")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Protocol("no session ID in login response".to_string()))?;

    let server_url = element_value(&result, "serverUrl")?
        .ok_or_else(|| Error::Protocol("no server URL in login response".to_string()))?;

    let instance = extract_instance_url(&server_url).ok_or_else(|| {
        Error::Protocol(format!("cannot derive instance URL from '{}'", server_url))
    })?;
    let instance_url = Url::parse(&instance)
        .map_err(|e| Error::Protocol(format!("invalid instance URL '{}': {}", instance, e)))?;

    let user = match element_text(&result, "userInfo")? {
        Some(info) => UserIdentity {
            user_id: element_value(&info, "userId")?.unwrap_or_default(),
            org_id: element_value(&info, "organizationId")?.unwrap_or_default(),
            display_name: element_value(&info, "userFullName")?.unwrap_or_default(),
        },
        None => UserIdentity::default(),
    };

    Ok(LoginResult {
        session_id,
        server_url,
        instance_url,
        user,
    })
}

/// Unescaped text of a leaf element
fn element_value(xml: &str, tag: &str) -> Result<Option<String>> {
    Ok(element_text(xml, tag)?.map(|text| xml_unescape(&text)))
}

/// Raw content of the first element whose local name is `tag`, ignoring
/// any namespace prefix. Nested markup is returned verbatim.
fn element_text(xml: &str, tag: &str) -> Result<Option<String>> {
    let pattern = format!(
        r"(?s)<(?:[A-Za-z_][\w.-]*:)?{tag}(?:\s[^>]*)?>(.*?)</(?:[A-Za-z_][\w.-]*:)?{tag}\s*>",
        tag = regex::escape(tag)
    );
    let re = Regex::new(&pattern)
        .map_err(|e| Error::Protocol(format!("invalid element pattern for {}: {}", tag, e)))?;
    Ok(re
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string()))
}
