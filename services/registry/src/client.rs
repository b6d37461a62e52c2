//! The registry client.
//!
//! [`RegistryClient`] speaks the OCI distribution API over a tower service.
//! The default service is a `hyperdriver` client, tests substitute
//! [`crate::mock::MockService`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt as _;
use hyperdriver::Body;
use hyperdriver::client::conn::transport::tcp::TcpTransportConfig;
use serde::de::DeserializeOwned;
use tower::ServiceExt as _;
use tower::util::BoxCloneSyncService;

use crate::auth::{self, Authenticator, Challenge, CATALOG_SCOPE};
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{BoxError, RegistryError, RegistryResult, ResponseError};
use crate::manifest::{
    detect_media_type, media_types, Descriptor, Digest, ImageConfig, ManifestKind, ManifestList,
    RawManifest,
};
use crate::paginate::{next_link, CatalogPage, Paginator, TagPage};
use crate::reference::{validate_domain, validate_repository};
use crate::retry::Backoff;

const USER_AGENT: &str = concat!("archmerge-registry/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_REDIRECTS: usize = 5;
const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// The HTTP service a [`RegistryClient`] sends requests through.
pub type RegistryService = BoxCloneSyncService<Request<Body>, Response<Body>, BoxError>;

/// One entry of a manifest list to be pushed.
///
/// The image lives in `source_repository` and is copied into the target
/// repository before the list referencing it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Repository currently holding the image
    pub source_repository: String,

    /// The image, with its platform set
    pub descriptor: Descriptor,
}

/// A request to the registry, kept around so it can be re-sent after an
/// authentication challenge.
#[derive(Debug, Clone)]
struct Call {
    method: Method,
    path: String,
    scopes: Vec<String>,
    accept: Option<&'static str>,
    content_type: Option<String>,
    body: Option<Bytes>,
}

impl Call {
    fn new(method: Method, path: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            scopes: vec![scope.into()],
            accept: None,
            content_type: None,
            body: None,
        }
    }

    fn get(path: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::new(Method::GET, path, scope)
    }

    fn head(path: impl Into<String>, scope: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path, scope)
    }

    fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }

    fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    fn body(mut self, content_type: impl Into<String>, body: Bytes) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body);
        self
    }

    /// Key for the token cache.
    fn scope_key(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Builder for a [`RegistryClient`].
pub struct RegistryClientBuilder {
    domain: String,
    credentials: Option<Credentials>,
    insecure: bool,
    timeout: Duration,
    backoff: Backoff,
    page_size: usize,
    service: Option<RegistryService>,
}

impl fmt::Debug for RegistryClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClientBuilder")
            .field("domain", &self.domain)
            .field("credentials", &self.credentials)
            .field("insecure", &self.insecure)
            .field("timeout", &self.timeout)
            .field("backoff", &self.backoff)
            .field("page_size", &self.page_size)
            .field("service", &self.service.is_some())
            .finish()
    }
}

impl RegistryClientBuilder {
    /// Start building a client for the registry at `domain` (`host[:port]`).
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            credentials: None,
            insecure: false,
            timeout: DEFAULT_TIMEOUT,
            backoff: Backoff::default(),
            page_size: DEFAULT_PAGE_SIZE,
            service: None,
        }
    }

    /// Use these credentials, or none for anonymous access.
    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Resolve credentials for the domain from a provider.
    pub fn credentials_from(
        mut self,
        provider: &dyn CredentialProvider,
    ) -> RegistryResult<Self> {
        self.credentials = provider.resolve(&self.domain)?;
        Ok(self)
    }

    /// Talk plain HTTP instead of HTTPS.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retry policy for idempotent requests.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Number of entries requested per catalog or tag page.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Send requests through `service` instead of a new HTTP client.
    pub fn service<S>(mut self, service: S) -> Self
    where
        S: tower::Service<Request<Body>, Response = Response<Body>>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Error: Into<BoxError>,
        S::Future: Send + 'static,
    {
        self.service = Some(BoxCloneSyncService::new(
            service.map_err(Into::<BoxError>::into),
        ));
        self
    }

    /// Validate the domain and build the client.
    pub fn build(self) -> RegistryResult<RegistryClient> {
        validate_domain(&self.domain)?;

        let base = match self.service {
            Some(service) => service,
            None => default_service(self.timeout),
        };

        let service = tower::ServiceBuilder::new()
            .retry(self.backoff)
            .service(base);

        Ok(RegistryClient {
            domain: self.domain,
            scheme: if self.insecure { "http" } else { "https" },
            service: BoxCloneSyncService::new(service),
            auth: Arc::new(Authenticator::new(self.credentials)),
            timeout: self.timeout,
            page_size: self.page_size,
        })
    }
}

fn default_service(timeout: Duration) -> RegistryService {
    let mut tcp = TcpTransportConfig::default();
    tcp.connect_timeout = Some(CONNECT_TIMEOUT);

    let client = hyperdriver::Client::builder()
        .layer(
            tower_http::set_header::SetRequestHeaderLayer::if_not_present(
                header::ACCEPT,
                HeaderValue::from_static(media_types::ACCEPT_ANY),
            ),
        )
        .with_tcp(tcp)
        .with_default_tls()
        .with_auto_http()
        .with_user_agent(USER_AGENT.to_owned())
        .with_timeout(timeout)
        .build_service();

    BoxCloneSyncService::new(client.map_err(Into::<BoxError>::into))
}

/// A client for one OCI distribution registry.
///
/// Cloning is cheap: clones share the HTTP service and the token cache.
#[derive(Clone)]
pub struct RegistryClient {
    domain: String,
    scheme: &'static str,
    service: RegistryService,
    auth: Arc<Authenticator>,
    timeout: Duration,
    page_size: usize,
}

impl fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("domain", &self.domain)
            .field("scheme", &self.scheme)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Start building a client for `domain`.
    pub fn builder(domain: impl Into<String>) -> RegistryClientBuilder {
        RegistryClientBuilder::new(domain)
    }

    /// The registry domain this client talks to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn uri(&self, path: &str) -> RegistryResult<http::Uri> {
        Ok(format!("{}://{}{}", self.scheme, self.domain, path).parse()?)
    }

    async fn execute(
        &self,
        uri: http::Uri,
        call: &Call,
        authorization: Option<HeaderValue>,
    ) -> RegistryResult<Response<Body>> {
        let mut builder = Request::builder().method(call.method.clone()).uri(uri.clone());
        if let Some(accept) = call.accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        if let Some(content_type) = &call.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(authorization) = authorization {
            builder = builder.header(header::AUTHORIZATION, authorization);
        }
        let body = call.body.clone().map(Body::from).unwrap_or_else(Body::empty);
        let request = builder.body(body)?;

        tracing::debug!(method = %call.method, %uri, "registry request");
        self.dispatch(request).await
    }

    /// Send a prepared request through the service, bounded by the timeout.
    async fn dispatch(&self, request: Request<Body>) -> RegistryResult<Response<Body>> {
        let method = request.method().clone();
        let uri = request.uri().clone();

        match tokio::time::timeout(self.timeout, self.service.clone().oneshot(request)).await {
            Ok(result) => result.map_err(|source| RegistryError::Transport {
                method,
                uri,
                source,
            }),
            Err(elapsed) => Err(RegistryError::Transport {
                method,
                uri,
                source: Box::new(elapsed),
            }),
        }
    }

    /// Send a call, answering one authentication challenge if needed.
    async fn send(&self, call: &Call) -> RegistryResult<Response<Body>> {
        let uri = self.uri(&call.path)?;
        let key = call.scope_key();

        let response = self
            .execute(uri.clone(), call, self.auth.header(&key)?)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(Challenge::parse);

        match challenge {
            Some(Challenge::Basic) => self.auth.use_basic()?,
            Some(Challenge::Bearer {
                realm,
                service,
                scope,
            }) => {
                let token = self
                    .fetch_token(&realm, service.as_deref(), &call.scopes, scope.as_deref())
                    .await?;
                self.auth.store_token(&key, token);
            }
            None => return Err(error_for(response, uri).await.into()),
        }

        self.execute(uri, call, self.auth.header(&key)?).await
    }

    /// Send a call and fail on any non-success status.
    async fn send_ok(&self, call: &Call) -> RegistryResult<Response<Body>> {
        let response = self.send(call).await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let uri = self.uri(&call.path)?;
        Err(error_for(response, uri).await.into())
    }

    #[tracing::instrument(skip(self, scopes))]
    async fn fetch_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scopes: &[String],
        requested: Option<&str>,
    ) -> RegistryResult<crate::credentials::Secret> {
        let mut url = url::Url::parse(realm)
            .map_err(|err| RegistryError::Authentication(format!("invalid realm {realm}: {err}")))?;

        let mut wanted: Vec<&str> = Vec::new();
        for scope in scopes
            .iter()
            .map(String::as_str)
            .chain(requested.into_iter().flat_map(str::split_whitespace))
        {
            if !wanted.contains(&scope) {
                wanted.push(scope);
            }
        }

        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            for scope in &wanted {
                query.append_pair("scope", scope);
            }
        }

        let uri: http::Uri = url.as_str().parse()?;
        let mut builder = Request::get(uri.clone()).header(header::ACCEPT, "application/json");
        if let Some(credentials) = self.auth.credentials() {
            builder = builder.header(
                header::AUTHORIZATION,
                auth::basic_auth(&credentials.username, Some(credentials.password.revealed())),
            );
        }
        let request = builder.body(Body::empty())?;

        let response = self.dispatch(request).await?;
        if !response.status().is_success() {
            return Err(error_for(response, uri).await.into());
        }
        let body = read_body(response).await?;
        auth::parse_token(&body)
    }

    async fn paginate<P>(
        &self,
        first: String,
        scope: &str,
        what: &'static str,
    ) -> RegistryResult<Vec<String>>
    where
        P: Paginator + DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first);

        while let Some(path) = next.take() {
            if !visited.insert(path.clone()) {
                tracing::warn!(%path, "{what} pagination revisits a page, stopping");
                break;
            }

            let call = Call::get(path.as_str(), scope).accept("application/json");
            let response = self.send_ok(&call).await?;
            let link = next_link(response.headers(), &self.uri(&path)?);

            let body = read_body(response).await?;
            tracing::trace!(body = %String::from_utf8_lossy(&body), "{what} page");
            let page: P = serde_json::from_slice(&body)
                .map_err(|source| RegistryError::Json { what, source })?;
            items.extend(page.items());

            next = link;
        }

        Ok(items)
    }

    /// List every repository in the registry.
    #[tracing::instrument(skip(self), fields(domain = %self.domain))]
    pub async fn catalog(&self) -> RegistryResult<Vec<String>> {
        self.paginate::<CatalogPage>(
            format!("/v2/_catalog?n={}", self.page_size),
            CATALOG_SCOPE,
            "catalog",
        )
        .await
        .map_err(|err| match err {
            RegistryError::Json { .. } => RegistryError::NotARegistry(self.domain.clone()),
            err => err,
        })
    }

    /// List every tag of a repository.
    #[tracing::instrument(skip(self))]
    pub async fn tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        validate_repository(repository)?;
        self.paginate::<TagPage>(
            format!("/v2/{repository}/tags/list?n={}", self.page_size),
            &auth::pull_scope(repository),
            "tag list",
        )
        .await
    }

    /// The content digest of a manifest, by tag or digest.
    ///
    /// Uses `Docker-Content-Digest` from a `HEAD` request, hashing the
    /// manifest body when the registry leaves the header out.
    #[tracing::instrument(skip(self))]
    pub async fn digest(&self, repository: &str, reference: &str) -> RegistryResult<Digest> {
        validate_repository(repository)?;
        let path = format!("/v2/{repository}/manifests/{reference}");
        let call = Call::head(path, auth::pull_scope(repository)).accept(media_types::ACCEPT_ANY);

        let response = self.send_ok(&call).await?;
        if let Some(digest) = header_digest(response.headers())? {
            return Ok(digest);
        }

        tracing::debug!("no digest header, hashing manifest");
        Ok(self
            .manifest(repository, reference, media_types::ACCEPT_ANY)
            .await?
            .digest)
    }

    /// Fetch a manifest, verifying its digest.
    #[tracing::instrument(skip(self, accept))]
    pub async fn manifest(
        &self,
        repository: &str,
        reference: &str,
        accept: &'static str,
    ) -> RegistryResult<RawManifest> {
        validate_repository(repository)?;
        let path = format!("/v2/{repository}/manifests/{reference}");
        let call = Call::get(path, auth::pull_scope(repository)).accept(accept);

        let response = self.send_ok(&call).await?;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty() && value != "application/json");
        let reported = header_digest(response.headers())?;
        let data = read_body(response).await?;

        let digest = Digest::sha256(&data);
        if let Ok(expected) = reference.parse::<Digest>() {
            expected.verify(&data)?;
        } else if let Some(reported) = reported {
            if reported.algorithm() == "sha256" && reported != digest {
                return Err(RegistryError::DigestMismatch {
                    expected: reported.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        let media_type = content_type.unwrap_or_else(|| detect_media_type(&data));
        Ok(RawManifest {
            media_type,
            digest,
            data,
        })
    }

    /// The entries of the manifest list stored under a tag.
    ///
    /// A tag holding a single image manifest has no entries.
    #[tracing::instrument(skip(self))]
    pub async fn manifest_list(
        &self,
        repository: &str,
        tag: &str,
    ) -> RegistryResult<Vec<Descriptor>> {
        let manifest = self.manifest(repository, tag, media_types::ACCEPT_ANY).await?;
        match manifest.kind()? {
            ManifestKind::List => Ok(manifest.list()?.manifests),
            ManifestKind::Image => Ok(Vec::new()),
        }
    }

    /// Describe a single-platform image, reading its platform from the config blob.
    #[tracing::instrument(skip(self))]
    pub async fn image(&self, repository: &str, reference: &str) -> RegistryResult<Descriptor> {
        let manifest = self.manifest(repository, reference, media_types::ACCEPT_IMAGE).await?;
        if manifest.kind()? != ManifestKind::Image
            || manifest.media_type == media_types::DOCKER_MANIFEST_V1
            || manifest.media_type == media_types::DOCKER_MANIFEST_V1_SIGNED
        {
            return Err(RegistryError::UnsupportedManifestType(manifest.media_type));
        }

        let image = manifest.image()?;
        let config = self.blob(repository, &image.config.digest).await?;
        let config: ImageConfig =
            serde_json::from_slice(&config).map_err(|source| RegistryError::Json {
                what: "image config",
                source,
            })?;

        Ok(manifest.descriptor(Some(config.platform())))
    }

    /// Fetch a blob, following storage redirects.
    #[tracing::instrument(skip(self))]
    pub async fn blob(&self, repository: &str, digest: &Digest) -> RegistryResult<Bytes> {
        validate_repository(repository)?;
        let path = format!("/v2/{repository}/blobs/{digest}");
        let call = Call::get(path.as_str(), auth::pull_scope(repository));

        let mut response = self.send(&call).await?;
        let mut uri = self.uri(&path)?;
        let mut redirects = 0;

        while response.status().is_redirection() {
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(RegistryError::Redirects(digest.to_string()));
            }

            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .ok_or(RegistryError::Header("Location"))?;
            let next = url::Url::parse(&uri.to_string())
                .and_then(|base| base.join(location))
                .map_err(|_| RegistryError::Header("Location"))?;
            uri = next.as_str().parse()?;

            // Storage backends reject the registry's credentials.
            let request = Request::get(uri.clone()).body(Body::empty())?;
            response = self.dispatch(request).await?;
        }

        if !response.status().is_success() {
            return Err(error_for(response, uri).await.into());
        }

        let data = read_body(response).await?;
        digest.verify(&data)?;
        Ok(data)
    }

    /// Whether a blob exists in a repository.
    pub async fn blob_exists(&self, repository: &str, digest: &Digest) -> RegistryResult<bool> {
        validate_repository(repository)?;
        let path = format!("/v2/{repository}/blobs/{digest}");
        exists(self.send_ok(&Call::head(path, auth::pull_scope(repository))).await)
    }

    /// Whether a manifest exists in a repository.
    pub async fn manifest_exists(&self, repository: &str, reference: &str) -> RegistryResult<bool> {
        validate_repository(repository)?;
        let path = format!("/v2/{repository}/manifests/{reference}");
        let call = Call::head(path, auth::pull_scope(repository)).accept(media_types::ACCEPT_ANY);
        exists(self.send_ok(&call).await)
    }

    /// Make a blob from `source` available in `target`.
    ///
    /// Asks the registry for a cross-repository mount. When it declines and
    /// opens an upload session instead, the blob is copied through that session.
    #[tracing::instrument(skip(self))]
    pub async fn mount_blob(
        &self,
        target: &str,
        source: &str,
        digest: &Digest,
    ) -> RegistryResult<()> {
        validate_repository(target)?;
        validate_repository(source)?;

        let path = format!("/v2/{target}/blobs/uploads/?mount={digest}&from={source}");
        let call = Call::new(Method::POST, path, auth::push_scope(target))
            .scope(auth::pull_scope(source));
        let response = self.send_ok(&call).await?;

        if response.status() == StatusCode::CREATED {
            return Ok(());
        }

        tracing::debug!("mount declined, copying blob");
        let location = upload_location(&response)?;
        let data = self.blob(source, digest).await?;

        let separator = if location.contains('?') { '&' } else { '?' };
        let path = format!("{location}{separator}digest={digest}");
        let call = Call::new(Method::PUT, path, auth::push_scope(target))
            .body("application/octet-stream", data);
        self.send_ok(&call).await?;
        Ok(())
    }

    /// Store a manifest under a tag or digest, returning its digest.
    #[tracing::instrument(skip(self, media_type, data))]
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        data: Bytes,
    ) -> RegistryResult<Digest> {
        validate_repository(repository)?;
        let digest = Digest::sha256(&data);
        let path = format!("/v2/{repository}/manifests/{reference}");
        let call = Call::new(Method::PUT, path, auth::push_scope(repository)).body(media_type, data);

        let response = self.send_ok(&call).await?;
        match header_digest(response.headers())? {
            Some(reported) if reported != digest => Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: reported.to_string(),
            }),
            _ => Ok(digest),
        }
    }

    /// Copy a single-platform image between repositories of this registry.
    #[tracing::instrument(skip(self))]
    pub async fn copy_image(
        &self,
        source: &str,
        target: &str,
        digest: &Digest,
    ) -> RegistryResult<()> {
        if source == target || self.manifest_exists(target, digest.as_str()).await? {
            return Ok(());
        }

        let manifest = self
            .manifest(source, digest.as_str(), media_types::ACCEPT_IMAGE)
            .await?;
        let image = manifest.image()?;

        for blob in image.blobs() {
            if !self.blob_exists(target, &blob.digest).await? {
                self.mount_blob(target, source, &blob.digest).await?;
            }
        }

        self.put_manifest(target, digest.as_str(), &manifest.media_type, manifest.data)
            .await?;
        Ok(())
    }

    /// Write a manifest list to `repository:tag`, replacing whatever was there.
    ///
    /// Entries are written in the order given. Each entry's image is copied into
    /// `repository` first, so the list never references missing manifests.
    #[tracing::instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn push_index(
        &self,
        repository: &str,
        tag: &str,
        entries: &[IndexEntry],
    ) -> RegistryResult<Digest> {
        let mut list = ManifestList::new();
        for entry in entries {
            self.copy_image(&entry.source_repository, repository, &entry.descriptor.digest)
                .await?;
            list.push(entry.descriptor.clone());
        }

        let data = Bytes::from(list.to_vec()?);
        let digest = self
            .put_manifest(repository, tag, list.content_type(), data)
            .await?;
        tracing::info!(%digest, "pushed {repository}:{tag}");
        Ok(digest)
    }
}

fn exists(result: RegistryResult<Response<Body>>) -> RegistryResult<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err),
    }
}

fn header_digest(headers: &http::HeaderMap) -> RegistryResult<Option<Digest>> {
    match headers.get(DOCKER_CONTENT_DIGEST) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map_err(|_| RegistryError::Header("Docker-Content-Digest"))?
            .parse()
            .map(Some),
    }
}

fn upload_location(response: &Response<Body>) -> RegistryResult<String> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(RegistryError::Header("Location"))?;

    // Upload locations may be absolute, only the path and query are kept.
    let uri: http::Uri = location.parse()?;
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .ok_or(RegistryError::Header("Location"))
}

async fn read_body(response: Response<Body>) -> RegistryResult<Bytes> {
    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|err| RegistryError::Body(err.into()))?;
    Ok(collected.to_bytes())
}

async fn error_for(response: Response<Body>, uri: http::Uri) -> ResponseError {
    let status = response.status();
    let body = read_body(response).await.unwrap_or_default();
    ResponseError::new(status, uri, &body)
}
