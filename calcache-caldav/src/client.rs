//! CalDAV over HTTP.

use async_trait::async_trait;
use calcache_core::error::{CalError, CalResult};
use calcache_core::remote::{
    CalendarInfo, DEFAULT_REQUEST_TIMEOUT, ObjectFilter, RawObject, RemoteCalendar, SyncDelta,
};
use calcache_core::settings::ServerSettings;
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MATCH};
use reqwest::{Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::xml;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

pub struct CalDavClient {
    http: reqwest::Client,
    base: Url,
    credentials: Option<(String, Option<String>)>,
}

impl CalDavClient {
    pub fn new(
        base_url: &str,
        username: Option<String>,
        password: Option<String>,
        insecure: bool,
    ) -> CalResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| CalError::Config(format!("Invalid server url '{base_url}': {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| CalError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(CalDavClient {
            http,
            base,
            credentials: username.map(|user| (user, password)),
        })
    }

    pub fn from_settings(server: &ServerSettings) -> CalResult<Self> {
        let url = server.url.as_deref().ok_or_else(|| {
            CalError::Config("No server url configured (set server.url or CALCACHE_SERVER__URL)".into())
        })?;
        Self::new(
            url,
            server.username.clone(),
            server.password.clone(),
            server.insecure,
        )
    }

    fn url(&self, path: &str) -> CalResult<Url> {
        self.base
            .join(path)
            .map_err(|e| CalError::Remote(format!("Invalid path '{path}': {e}")))
    }

    fn request(&self, method: Method, path: &str) -> CalResult<reqwest::RequestBuilder> {
        let builder = self.http.request(method, self.url(path)?);
        Ok(match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, password.as_deref()),
            None => builder,
        })
    }

    /// Send a PROPFIND or REPORT and return the multistatus body.
    async fn dav(&self, verb: &str, path: &str, depth: &str, body: String) -> CalResult<String> {
        let method = Method::from_bytes(verb.as_bytes())
            .map_err(|e| CalError::Internal(format!("bad method {verb}: {e}")))?;
        debug!(method = verb, path, depth, "dav request");

        let response = self
            .request(method, path)?
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .header("Depth", depth)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(verb, path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(verb, path, status));
        }
        response
            .text()
            .await
            .map_err(|e| transport_error(verb, path, e))
    }
}

#[async_trait]
impl RemoteCalendar for CalDavClient {
    async fn current_user_principal(&self) -> CalResult<String> {
        let path = self.base.path().to_string();
        let body = self
            .dav("PROPFIND", &path, "0", xml::CURRENT_USER_PRINCIPAL.into())
            .await?;
        xml::href_property(&body, "current-user-principal")?
            .ok_or_else(|| CalError::Remote("server did not report a current-user-principal".into()))
    }

    async fn find_collection(&self, principal: &str) -> CalResult<String> {
        let body = self
            .dav("PROPFIND", principal, "0", xml::CALENDAR_HOME_SET.into())
            .await?;
        xml::href_property(&body, "calendar-home-set")?.ok_or_else(|| {
            CalError::Remote(format!("no calendar-home-set for principal {principal}"))
        })
    }

    async fn list_calendars(&self, home_set: &str) -> CalResult<Vec<CalendarInfo>> {
        let body = self
            .dav("PROPFIND", home_set, "1", xml::CALENDAR_PROPERTIES.into())
            .await?;
        xml::calendars(&body)
    }

    async fn query_objects(
        &self,
        collection: &str,
        filter: &ObjectFilter,
    ) -> CalResult<Vec<RawObject>> {
        let body = self
            .dav("REPORT", collection, "1", xml::calendar_query(filter))
            .await?;
        xml::resources(&body)
    }

    async fn sync_delta(&self, collection: &str, sync_token: &str) -> CalResult<SyncDelta> {
        let body = self
            .dav("REPORT", collection, "1", xml::sync_collection(sync_token))
            .await?;
        xml::sync_delta(&body)
    }

    async fn multi_get(&self, collection: &str, paths: &[String]) -> CalResult<Vec<RawObject>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let body = self
            .dav("REPORT", collection, "1", xml::calendar_multiget(paths))
            .await?;
        xml::resources(&body)
    }

    async fn put(&self, path: &str, object: &RawObject) -> CalResult<RawObject> {
        let mut request = self
            .request(Method::PUT, path)?
            .header(CONTENT_TYPE, ICS_CONTENT_TYPE)
            .body(object.data.clone());
        if let Some(etag) = &object.etag {
            request = request.header(IF_MATCH, etag);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("PUT", path, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("PUT", path, status));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(RawObject {
            path: path.to_string(),
            data: object.data.clone(),
            etag,
        })
    }

    async fn delete(&self, path: &str) -> CalResult<()> {
        let response = self
            .request(Method::DELETE, path)?
            .send()
            .await
            .map_err(|e| transport_error("DELETE", path, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("DELETE", path, status));
        }
        Ok(())
    }
}

fn transport_error(verb: &str, path: &str, err: reqwest::Error) -> CalError {
    if err.is_timeout() {
        CalError::Timeout(DEFAULT_REQUEST_TIMEOUT)
    } else {
        CalError::Remote(format!("{verb} {path}: {err}"))
    }
}

fn status_error(verb: &str, path: &str, status: StatusCode) -> CalError {
    CalError::Remote(format!("{verb} {path}: server answered {status}"))
}
