//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 消息正文为空（或只包含空白字符）
    #[error("消息内容不能为空")]
    EmptyMessage,

    /// 消息正文超过字符上限
    #[error("消息内容超过 {max} 个字符")]
    MessageTooLong { max: usize },
}
