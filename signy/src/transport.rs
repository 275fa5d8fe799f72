// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builds an authenticated HTTP transport to the trust server: ping the
//! `/v2/` endpoint, read the auth challenge, resolve default credentials,
//! and exchange them for a bearer token scoped to the GUN.

use crate::error::{self, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;
use reqwest::blocking::{Client, Response};
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::StatusCode;
use serde::Deserialize;
use snafu::ResultExt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// The default Notary server associated with Docker Hub.
pub const DOCKER_NOTARY_SERVER: &str = "https://notary.docker.io";

const DEFAULT_INDEX_SERVER: &str = "https://index.docker.io/v1/";
const USER_AGENT: &str = "signy";

/// Settings for building a transport to a trust server.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Base URL of the trust server.
    pub server: String,
    /// Optional CA certificate bundle; when set, TLS trusts only this root.
    pub tlscacert: Option<PathBuf>,
    /// Timeout applied to every request. Multi-round-trip operations get
    /// the full timeout per round trip.
    pub timeout: Duration,
}

impl TransportSettings {
    /// Settings pointing at a server with the default five second timeout.
    pub fn new(server: &str) -> Self {
        Self {
            server: server.to_owned(),
            tlscacert: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// An HTTP client bound to one trust server and one GUN, carrying the
/// bearer token (if any) obtained from the server's auth challenge.
#[derive(Debug)]
pub struct AuthClient {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl AuthClient {
    /// Builds the transport: assembles the base client, pings `/v2/`,
    /// answers the challenge, and binds `push,pull` scope for `gun`.
    ///
    /// Missing credentials are not fatal; anonymous pulls are allowed and
    /// the condition is logged at debug level.
    pub fn build(settings: &TransportSettings, gun: &str) -> Result<Self> {
        let base = Url::parse(&settings.server).context(error::UrlParseSnafu {
            url: settings.server.clone(),
        })?;

        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout);
        if let Some(path) = &settings.tlscacert {
            let pem = std::fs::read(path).context(error::CaCertReadSnafu { path })?;
            let certificate =
                reqwest::Certificate::from_pem(&pem).context(error::CaCertParseSnafu { path })?;
            builder = builder.use_rustls_tls().add_root_certificate(certificate);
        }
        let client = builder.build().context(error::HttpClientBuildSnafu)?;

        let ping_url = join(&base, "v2/")?;
        let response = client
            .get(ping_url.clone())
            .send()
            .context(error::ServerPingSnafu {
                server: settings.server.clone(),
            })?;

        let token = match response.status() {
            StatusCode::UNAUTHORIZED => {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(parse_bearer_challenge);
                match challenge {
                    Some(challenge) => {
                        Some(fetch_token(&client, &challenge, &base, gun)?)
                    }
                    None => {
                        debug!("trust server sent 401 without a bearer challenge");
                        None
                    }
                }
            }
            status if status.is_success() => None,
            status => {
                return error::RemoteStatusSnafu {
                    status,
                    url: ping_url.to_string(),
                }
                .fail()
            }
        };

        Ok(Self {
            client,
            base,
            token,
        })
    }

    /// Sends a `GET` for a server-relative path. Returns `None` on a 404;
    /// any other non-success status is an error.
    pub fn get_bytes(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let url = join(&self.base, path)?;
        let response = self.send(self.client.get(url.clone()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(
                response
                    .bytes()
                    .context(error::FetchSnafu {
                        url: url.to_string(),
                    })?
                    .to_vec(),
            )),
            status => error::RemoteStatusSnafu {
                status,
                url: url.to_string(),
            }
            .fail(),
        }
    }

    /// Sends a `POST` of a JSON body to a server-relative path.
    pub fn post_json(&self, path: &str, body: String) -> Result<()> {
        let url = join(&self.base, path)?;
        let response = self.send(
            self.client
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body),
        )?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            error::RemoteStatusSnafu {
                status,
                url: url.to_string(),
            }
            .fail()
        }
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let request = request.build().context(error::HttpClientBuildSnafu)?;
        let url = request.url().to_string();
        self.client
            .execute(request)
            .context(error::FetchSnafu { url })
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path).context(error::UrlParseSnafu {
        url: format!("{}{}", base, path),
    })
}

/// A parsed `Www-Authenticate: Bearer` challenge.
#[derive(Debug, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
}

fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let params = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for param in params.split(',') {
        let (key, value) = param.trim().split_once('=')?;
        let value = value.trim_matches('"');
        match key {
            "realm" => realm = Some(value.to_owned()),
            "service" => service = Some(value.to_owned()),
            _ => {}
        }
    }
    Some(BearerChallenge {
        realm: realm?,
        service,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Exchanges (optional) credentials for a bearer token with `push,pull`
/// scope on the GUN.
fn fetch_token(
    client: &Client,
    challenge: &BearerChallenge,
    server: &Url,
    gun: &str,
) -> Result<String> {
    let mut url = Url::parse(&challenge.realm).context(error::UrlParseSnafu {
        url: challenge.realm.clone(),
    })?;
    {
        let mut query = url.query_pairs_mut();
        if let Some(service) = &challenge.service {
            query.append_pair("service", service);
        }
        query.append_pair("scope", &format!("repository:{}:push,pull", gun));
    }

    let mut request = client.get(url.clone());
    match docker_credentials(server) {
        Some((username, password)) => {
            request = request.basic_auth(username, Some(password));
        }
        None => {
            debug!(
                "no credentials for trust server {}, requesting anonymous token",
                server
            );
        }
    }

    let response = request.send().context(error::TokenExchangeSnafu {
        url: url.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        return error::RemoteStatusSnafu {
            status,
            url: url.to_string(),
        }
        .fail();
    }
    let body: TokenResponse = response.json().context(error::TokenExchangeSnafu {
        url: url.to_string(),
    })?;
    body.token
        .or(body.access_token)
        .ok_or(error::Error::TokenMissing {
            url: url.to_string(),
        })
}

/// Where the Docker config directory lives.
fn docker_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir));
    }
    dirs::home_dir().map(|home| home.join(".docker"))
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: std::collections::HashMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl DockerAuth {
    fn credentials(&self) -> Option<(String, String)> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Some((username.clone(), password.clone()));
        }
        let decoded = STANDARD.decode(self.auth.as_deref()?).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some((username.to_owned(), password.to_owned()))
    }
}

fn load_docker_config() -> Option<DockerConfig> {
    let path = docker_config_dir()?.join("config.json");
    let raw = match std::fs::read(&path) {
        Ok(raw) => raw,
        Err(err) => {
            debug!("cannot read {}: {}", path.display(), err);
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(config) => Some(config),
        Err(err) => {
            debug!("cannot parse {}: {}", path.display(), err);
            None
        }
    }
}

/// Looks up credentials for a registry host in the Docker config.
pub(crate) fn host_credentials(host: &str) -> Option<(String, String)> {
    load_docker_config()?.auths.get(host)?.credentials()
}

/// Resolves default credentials for the server from the Docker config
/// directory. Hub's Notary server falls back to the canonical index entry.
fn docker_credentials(server: &Url) -> Option<(String, String)> {
    let config = load_docker_config()?;
    let host = server.host_str()?;
    if let Some(auth) = config.auths.get(host) {
        return auth.credentials();
    }
    if server.as_str().trim_end_matches('/') == DOCKER_NOTARY_SERVER {
        if let Some(auth) = config.auths.get(DEFAULT_INDEX_SERVER) {
            return auth.credentials();
        }
    }
    debug!("authentication not found for trust server {}", server);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    #[test]
    fn parse_challenge_header() {
        let challenge = parse_bearer_challenge(
            "Bearer realm=\"https://auth.docker.io/token\",service=\"notary.docker.io\"",
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("notary.docker.io"));

        assert!(parse_bearer_challenge("Basic realm=\"x\"").is_none());
    }

    #[test]
    fn anonymous_transport_when_ping_succeeds() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v2/"))
                .respond_with(status_code(200)),
        );

        let settings = TransportSettings::new(&server.url_str("/"));
        let client = AuthClient::build(&settings, "example.com/demo").unwrap();
        assert!(client.token.is_none());
    }

    #[test]
    fn challenge_is_answered_with_a_scoped_token() {
        let server = Server::run();
        let realm = server.url_str("/token");
        server.expect(
            Expectation::matching(request::method_path("GET", "/v2/")).respond_with(
                status_code(401).append_header(
                    "Www-Authenticate",
                    format!("Bearer realm=\"{}\",service=\"testsvc\"", realm),
                ),
            ),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/token"),
                request::query(url_decoded(contains((
                    "scope",
                    "repository:example.com/demo:push,pull"
                )))),
            ])
            .respond_with(json_encoded(serde_json::json!({"token": "abc123"}))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/v2/example.com/demo/_trust/tuf/root.json"),
                request::headers(contains(("authorization", "Bearer abc123"))),
            ])
            .respond_with(status_code(404)),
        );

        let settings = TransportSettings::new(&server.url_str("/"));
        let client = AuthClient::build(&settings, "example.com/demo").unwrap();
        assert_eq!(client.token.as_deref(), Some("abc123"));
        assert_eq!(
            client
                .get_bytes("v2/example.com/demo/_trust/tuf/root.json")
                .unwrap(),
            None,
        );
    }

    #[test]
    fn timeout_is_honoured() {
        // A TCP sink that accepts connections but never responds.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept() {
                held.push(socket);
            }
        });

        let mut settings = TransportSettings::new(&format!("http://{}", addr));
        settings.timeout = Duration::from_millis(500);

        let started = std::time::Instant::now();
        let result = AuthClient::build(&settings, "example.com/demo");
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(3));
        drop(handle);
    }
}
