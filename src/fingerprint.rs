use sha2::{Digest, Sha256}; // 引入 SHA2 算法和 Digest 特性(方法集)

/// 计算上传文件的 SHA256 指纹 (小写十六进制)
///
/// 作用：解决“这次分析的到底是哪个文件”。
/// 选择文件时返回给调用方作为回执，日志里也用它来关联同一个文件的选择与分析，
/// 而不用把文件名 (可能带隐私信息) 到处打印。
pub fn sha256_hex(bytes: &[u8]) -> String {
    // 创建一个哈希计算器的“状态机”实例，把数据喂进去
    let mut hasher = Sha256::new();
    hasher.update(bytes);

    // 按下“结束”按钮，得到 32 字节摘要，再转成 64 字符的 Hex 字符串
    hex::encode(hasher.finalize())
}

/// 日志里用的短指纹：已有十六进制摘要的前 12 个字符，不再重新计算
pub fn short_id(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}
