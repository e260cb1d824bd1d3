//! Blocking HTTP client for the store daemon.
//!
//! The daemon exposes an RPC-over-HTTP convention: every call is a POST with
//! query-string arguments, file payloads travel as multipart form data, and
//! failures come back as a JSON body `{"Message": "..."}`.

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use crate::client::{not_found_as_none, StoreClient};
use crate::error::ApiError;
use crate::types::{Listing, Stat, WriteOpts};

/// Connection settings for [`HttpStore`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the daemon RPC endpoint.
    pub base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            base_url: "http://127.0.0.1:5001/api/v0".to_string(),
        }
    }
}

/// HTTP implementation of [`StoreClient`].
///
/// No request timeout is set: a stalled daemon stalls the corresponding
/// filesystem call, and no call is ever retried.
pub struct HttpStore {
    config: HttpConfig,
    http: Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Deserialize)]
struct ResolveBody {
    path: String,
}

impl HttpStore {
    /// Build a client against `config.base_url`.
    pub fn new(config: HttpConfig) -> Result<Self, ApiError> {
        let http = Client::builder().build()?;
        Ok(HttpStore { config, http })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    /// Surface a daemon error body as [`ApiError::Store`], preserving the
    /// daemon's message verbatim for the bridge's translation table.
    fn check(resp: Response) -> Result<Response, ApiError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text()?;
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => err.message,
            Err(_) => format!("http {status}: {body}"),
        };
        debug!("daemon error: {}", message);
        Err(ApiError::Store { message })
    }

    fn exec(&self, endpoint: &str, args: &[(&str, String)]) -> Result<Response, ApiError> {
        debug!("rpc {} {:?}", endpoint, args);
        let resp = self.http.post(self.url(endpoint)).query(args).send()?;
        Self::check(resp)
    }

    fn exec_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        args: &[(&str, String)],
    ) -> Result<T, ApiError> {
        Ok(self.exec(endpoint, args)?.json()?)
    }

    fn exec_upload(
        &self,
        endpoint: &str,
        args: &[(&str, String)],
        data: &[u8],
    ) -> Result<(), ApiError> {
        debug!("rpc {} {:?} ({} bytes)", endpoint, args, data.len());
        let part = Part::bytes(data.to_vec()).file_name("file");
        let form = Form::new().part("data", part);
        let resp = self
            .http
            .post(self.url(endpoint))
            .query(args)
            .multipart(form)
            .send()?;
        Self::check(resp)?;
        Ok(())
    }
}

impl StoreClient for HttpStore {
    fn stat(&self, path: &str) -> Result<Option<Stat>, ApiError> {
        not_found_as_none(self.exec_json(
            "files/stat",
            &[("arg", path.to_string()), ("flush", "false".to_string())],
        ))
    }

    fn list(&self, path: &str, detailed: bool) -> Result<Option<Listing>, ApiError> {
        let mut args = vec![("arg", path.to_string()), ("flush", "false".to_string())];
        if detailed {
            args.push(("long", "true".to_string()));
        }
        not_found_as_none(self.exec_json("files/ls", &args))
    }

    fn read(&self, path: &str, offset: u64, count: usize) -> Result<Vec<u8>, ApiError> {
        let resp = self.exec(
            "files/read",
            &[
                ("arg", path.to_string()),
                ("offset", offset.to_string()),
                ("count", count.to_string()),
                ("flush", "false".to_string()),
            ],
        )?;
        Ok(resp.bytes()?.to_vec())
    }

    fn write(
        &self,
        path: &str,
        offset: u64,
        data: &[u8],
        opts: WriteOpts,
    ) -> Result<(), ApiError> {
        let mut args = vec![
            ("arg", path.to_string()),
            ("offset", offset.to_string()),
            ("flush", "false".to_string()),
        ];
        if opts.create {
            args.push(("create", "true".to_string()));
        }
        if opts.truncate {
            args.push(("truncate", "true".to_string()));
        }
        self.exec_upload("files/write", &args, data)
    }

    fn flush(&self, path: &str) -> Result<(), ApiError> {
        self.exec("files/flush", &[("arg", path.to_string())])?;
        Ok(())
    }

    fn mkdir(&self, path: &str) -> Result<(), ApiError> {
        self.exec("files/mkdir", &[("arg", path.to_string())])?;
        Ok(())
    }

    fn remove(&self, path: &str, recursive: bool) -> Result<(), ApiError> {
        let mut args = vec![("arg", path.to_string())];
        if recursive {
            args.push(("recursive", "true".to_string()));
        }
        self.exec("files/rm", &args)?;
        Ok(())
    }

    fn mv(&self, src: &str, dst: &str) -> Result<(), ApiError> {
        self.exec(
            "files/mv",
            &[("arg", src.to_string()), ("arg", dst.to_string())],
        )?;
        Ok(())
    }

    fn list_object(&self, path: &str) -> Result<Option<Listing>, ApiError> {
        not_found_as_none(self.exec_json("ls", &[("arg", path.to_string())]))
    }

    fn cat(&self, path: &str, offset: u64, length: usize) -> Result<Vec<u8>, ApiError> {
        let resp = self.exec(
            "cat",
            &[
                ("arg", path.to_string()),
                ("offset", offset.to_string()),
                ("length", length.to_string()),
            ],
        )?;
        Ok(resp.bytes()?.to_vec())
    }

    fn resolve(&self, name: &str) -> Result<Option<String>, ApiError> {
        let res: Result<ResolveBody, ApiError> =
            self.exec_json("resolve", &[("arg", format!("/names/{name}"))]);
        Ok(not_found_as_none(res)?.map(|body| body.path))
    }
}
