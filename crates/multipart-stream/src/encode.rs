use serde_json::Value;

/// Wraps `body` as a single multipart part with a `Content-Length` header.
pub fn encode_part(boundary: &str, body: &[u8]) -> Vec<u8> {
    let header = format!("--{boundary}\r\nContent-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body);
    buf
}

pub fn encode_json_part(boundary: &str, value: &Value) -> Vec<u8> {
    encode_part(boundary, value.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_layout() {
        let part = encode_part("boundary", b"{}");
        assert_eq!(part, b"--boundary\r\nContent-Length: 2\r\n\r\n{}".to_vec());
    }
}
