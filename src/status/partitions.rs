/// Key layout for the status partition
///
/// - `statuses`: status:{job_id} -> StatusRecord (JSON)

const STATUS_PREFIX: &str = "status:";

/// Encode a status key: status:{job_id}
pub fn encode_status_key(job_id: &str) -> Vec<u8> {
    format!("{STATUS_PREFIX}{job_id}").into_bytes()
}

/// Decode a status key: status:{job_id} -> job_id
pub fn decode_status_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str.strip_prefix(STATUS_PREFIX).map(String::from)
}
