//! Shared test fixtures — scripted HTTP transport

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use nimbus_cloud::{
    CloudError, HttpMethod, HttpTransport, Result, TransportRequest, TransportResponse,
};

/// Route test logs through tracing when RUST_LOG is set
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Clone)]
pub enum Scripted {
    Ok {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static [u8],
    },
    NetworkError(&'static str),
}

impl Scripted {
    pub fn ok(body: &'static [u8]) -> Self {
        Scripted::Ok {
            status: 200,
            headers: vec![],
            body,
        }
    }

    pub fn ok_with_headers(headers: Vec<(&'static str, &'static str)>, body: &'static [u8]) -> Self {
        Scripted::Ok {
            status: 200,
            headers,
            body,
        }
    }

    pub fn status(status: u16) -> Self {
        Scripted::Ok {
            status,
            headers: vec![],
            body: b"",
        }
    }
}

struct Rule {
    method: Option<HttpMethod>,
    url_contains: String,
    responses: Mutex<VecDeque<Scripted>>,
}

/// Transport answering from an ordered rule list. The last response of a
/// rule repeats once its queue drains.
pub struct ScriptedTransport {
    rules: Vec<Rule>,
    log: Mutex<Vec<(HttpMethod, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, method: HttpMethod, url_contains: &str, response: Scripted) -> Self {
        self.on_sequence(method, url_contains, vec![response])
    }

    pub fn on_sequence(
        mut self,
        method: HttpMethod,
        url_contains: &str,
        responses: Vec<Scripted>,
    ) -> Self {
        self.rules.push(Rule {
            method: Some(method),
            url_contains: url_contains.to_string(),
            responses: Mutex::new(responses.into()),
        });
        self
    }

    pub fn request_count(&self, method: HttpMethod, url_contains: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, url)| *m == method && url.contains(url_contains))
            .count()
    }

    pub fn total_requests(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.log
            .lock()
            .unwrap()
            .push((request.method, request.url.clone()));

        let rule = self
            .rules
            .iter()
            .find(|rule| {
                rule.method.map_or(true, |m| m == request.method)
                    && request.url.contains(&rule.url_contains)
            })
            .unwrap_or_else(|| panic!("no scripted response for {:?} {}", request.method, request.url));

        let scripted = {
            let mut queue = rule.responses.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().expect("scripted rule has a response")
            }
        };

        match scripted {
            Scripted::Ok {
                status,
                headers,
                body,
            } => {
                let headers: HashMap<String, String> = headers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                Ok(TransportResponse::new(status, headers, Bytes::from_static(body)))
            }
            Scripted::NetworkError(message) => Err(CloudError::Network(message.to_string())),
        }
    }
}
