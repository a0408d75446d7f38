/// Per-request metadata attached by `security::request_id`.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
}

pub const REQUEST_ID_HEADER: &str = "x-request-id";
