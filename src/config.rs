/// 서비스 환경 설정
/// 환경 변수는 기동 시점에 한 번만 읽는다.
// region:    --- Config
#[derive(Debug, Clone)]
pub struct Config {
    /// 서버 바인드 주소
    pub bind_addr: String,
    /// 스나이핑 방지 연장 윈도우(초)
    pub extension_window_secs: i64,
    /// 최소 입찰 증분 (0이면 현재가 초과만 요구)
    pub min_increment: i64,
    /// 원장 충돌 시 커밋 재시도 한도
    pub max_commit_retries: u32,
}

impl Config {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            extension_window_secs: env_i64("EXTENSION_WINDOW_SECS", 30),
            min_increment: env_i64("MIN_INCREMENT", 0),
            max_commit_retries: env_i64("MAX_COMMIT_RETRIES", 5) as u32,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            extension_window_secs: 30,
            min_increment: 0,
            max_commit_retries: 5,
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
// endregion: --- Config
