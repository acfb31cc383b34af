use bytes::Bytes;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Response {
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl Response {
    pub fn new(headers: HashMap<String, String>, body: Bytes) -> Self {
        Self { headers, body }
    }

    pub fn header(&self, key: impl AsRef<str>) -> Option<&str> {
        self.headers.get(key.as_ref()).map(|v| v.as_str())
    }

    pub fn status(&self) -> u16 {
        self.header(":status")
            .expect("no status in response")
            .parse()
            .expect("non-number status")
    }
}
