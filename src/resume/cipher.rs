//! 记录加密接口
//!
//! 续传记录的加密对本模块是外部协作者：一个以两个整数为密钥的
//! 对称变换。这里只定义注入点 [`RecordCipher`]，并提供一个与
//! 旧版文件格式兼容的默认实现 [`SeedCipher`]。
//!
//! 密文必须是单行安全的（不含字段分隔符 `|` 和换行符），
//! 因此所有实现的输出都经过 base64 编码。

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use super::error::{ResumeError, ResumeResult};

/// 记录加密接口
///
/// 以 `(k1, k2)` 两个整数为密钥的对称字节变换。
/// `decrypt(encrypt(s, k1, k2), k1, k2) == s` 必须对任意密钥成立。
pub trait RecordCipher: Send + Sync {
    /// 加密一段记录文本，输出必须不含 `|` 与换行符
    fn encrypt(&self, plain: &str, k1: i64, k2: i64) -> String;

    /// 解密 [`RecordCipher::encrypt`] 的输出
    fn decrypt(&self, data: &str, k1: i64, k2: i64) -> ResumeResult<String>;
}

/// 默认记录加密实现
///
/// 由两个种子整数派生确定性密钥流做异或变换，结果 base64 编码。
/// 这是旧版文件格式的混淆级加密，不提供密码学强度；
/// 需要真实加密的调用方注入自己的 [`RecordCipher`] 实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct SeedCipher;

impl SeedCipher {
    /// 由两个种子合成密钥流种子
    fn mix_seeds(k1: i64, k2: i64) -> u64 {
        (k1 as u64) ^ (k2 as u64).rotate_left(32)
    }

    /// 生成指定长度的密钥流并与输入异或
    fn xor_keystream(data: &[u8], k1: i64, k2: i64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(Self::mix_seeds(k1, k2));
        let mut keystream = vec![0u8; data.len()];
        rng.fill_bytes(&mut keystream);

        data.iter()
            .zip(keystream.iter())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

impl RecordCipher for SeedCipher {
    fn encrypt(&self, plain: &str, k1: i64, k2: i64) -> String {
        let mixed = Self::xor_keystream(plain.as_bytes(), k1, k2);
        STANDARD.encode(mixed)
    }

    fn decrypt(&self, data: &str, k1: i64, k2: i64) -> ResumeResult<String> {
        let raw = STANDARD
            .decode(data)
            .map_err(|e| ResumeError::MalformedRecord(format!("base64 解码失败: {}", e)))?;

        let plain = Self::xor_keystream(&raw, k1, k2);

        String::from_utf8(plain)
            .map_err(|e| ResumeError::MalformedRecord(format!("解密结果非 UTF-8: {}", e)))
    }
}
