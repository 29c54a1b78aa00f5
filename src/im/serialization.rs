use base64::Engine;
use serde::{Deserialize, Deserializer};

/// 反序列化数组字段，处理 null 值
pub(crate) fn deserialize_vec_or_null<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt = Option::<Vec<T>>::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// 解码 URL-safe Base64（VAPID 公钥格式），末尾的 `=` 填充可有可无
pub fn decode_url_safe_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = input.trim().trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(trimmed)
}

/// URL-safe Base64 编码（无填充）
pub fn encode_url_safe_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

/// 生成本地消息 ID，用于在服务器确认前标识乐观写入的消息
pub fn generate_local_msg_id(user_id: &str) -> String {
    format!("{}-{}", user_id, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vapid_key_decodes_with_or_without_padding() {
        let raw = [0xfbu8, 0xff, 0x3e, 0x01];
        let encoded = encode_url_safe_base64(&raw);
        assert_eq!(encoded, "-_8-AQ");
        assert_eq!(decode_url_safe_base64(&encoded).unwrap(), raw);
        assert_eq!(decode_url_safe_base64("-_8-AQ==").unwrap(), raw);
        assert!(decode_url_safe_base64("not base64!").is_err());
    }

    #[test]
    fn local_msg_ids_are_unique_per_call() {
        let a = generate_local_msg_id("u1");
        let b = generate_local_msg_id("u1");
        assert!(a.starts_with("u1-"));
        assert_ne!(a, b);
    }
}
