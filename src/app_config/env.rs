use std::env;

/// 布尔型环境变量：true/1为真（大小写不敏感），未设置时取默认值
pub fn env_is_true(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        Err(_) => default,
    }
}

/// 字符串环境变量，未设置时取默认值
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// 数值型环境变量，未设置或解析失败时取默认值
pub fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers_defaults() {
        assert!(env_is_true("MASST_NO_SUCH_FLAG", true));
        assert!(!env_is_true("MASST_NO_SUCH_FLAG", false));
        assert_eq!(env_or_default("MASST_NO_SUCH_VAR", "x"), "x");
        assert_eq!(env_parse_or::<u64>("MASST_NO_SUCH_NUM", 7), 7);
    }
}
