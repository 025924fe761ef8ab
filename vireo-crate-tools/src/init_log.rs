use std::io::Write;

/// 初始化全局 logger
///
/// 默认等级由调用方给出；如果设置了 `RUST_LOG`，则以环境变量为准
pub fn init_log(default_level: log::LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));
            let text_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            // windows 和 unix 的路径分隔符都要处理
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
                 {text_style}{}{text_style:#}",
                record.args()
            )
        })
        .filter(None, default_level);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    // 测试中可能被多次调用，重复初始化直接忽略
    if builder.try_init().is_err() {
        log::debug!("logger already initialized");
    }
}

/// 将配置文件中的字符串转换为日志等级，无法识别时使用 Info
pub fn parse_level(level: &str) -> log::LevelFilter {
    level.parse().unwrap_or(log::LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        // 非法值回退到 info
        assert_eq!(parse_level("loud"), log::LevelFilter::Info);
    }

    #[test]
    fn test_init_twice() {
        init_log(log::LevelFilter::Info);
        init_log(log::LevelFilter::Debug);
        log::info!("logger still usable");
    }
}
