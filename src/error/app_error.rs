use thiserror::Error;

use crate::trading::mt5::Mt5Error;

/// 应用错误
///
/// 对外暴露的错误不携带内部堆栈，只携带可读信息。
#[derive(Error, Debug)]
pub enum AppError {
    /// 策略不合法（无限风险、规则为空等），启动前即被拒绝
    #[error("策略不合法: {0}")]
    InvalidStrategy(String),

    /// 单次tick内的瞬时错误：记录后下个tick重试
    #[error("瞬时错误: {0}")]
    Transient(String),

    /// 提供方连接已断开，持有该连接的循环必须终止
    #[error("提供方连接已断开")]
    ConnectionLost,

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Store(String),

    /// 策略翻译服务错误
    #[error("策略翻译失败: {0}")]
    Translator(String),

    /// 指定品种没有运行中的循环
    #[error("循环未运行: {0}")]
    NotRunning(String),

    /// 同一品种只允许一个循环
    #[error("循环已在运行: {0}")]
    AlreadyRunning(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

/// 把MT5桥接错误归类为致命/瞬时两档
impl From<Mt5Error> for AppError {
    fn from(err: Mt5Error) -> Self {
        match err {
            Mt5Error::ConnectionLost => AppError::ConnectionLost,
            other => AppError::Transient(other.to_string()),
        }
    }
}
