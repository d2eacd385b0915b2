use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use zdraft_config::AppConfig;

const USAGE: &str = "用法: zdraft-app [--config <配置.toml>] [--scene <场景.json>]";

/// 命令行参数。
#[derive(Debug, Default, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    scene: Option<PathBuf>,
    help: bool,
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut options = Options::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let slot = match arg.as_str() {
                "--config" => &mut options.config,
                "--scene" => &mut options.scene,
                "-h" | "--help" => {
                    options.help = true;
                    continue;
                }
                other => return Err(format!("未知参数：{other}")),
            };
            let value = args.next().ok_or_else(|| format!("`{arg}` 需要提供文件路径"))?;
            *slot = Some(PathBuf::from(value));
        }
        Ok(options)
    }
}

fn main() {
    let options = match Options::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            std::process::exit(1);
        }
    };
    if options.help {
        println!("{USAGE}");
        return;
    }

    let config = load_configuration(options.config.as_ref());
    init_logging(&config.logging.level);
    info!(scene = ?options.scene, "启动 zdraft 应用");

    if let Err(err) = zdraft_frontend::run_cli_demo(&config, options.scene.as_deref()) {
        error!(error = %err, "执行 CLI 演示失败");
        std::process::exit(1);
    }
}

/// 显式路径优先，失败或缺省时走自动发现，最终回退到内建默认值。
fn load_configuration(path: Option<&PathBuf>) -> AppConfig {
    let loaded = match path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    };
    loaded.unwrap_or_else(|err| {
        // 日志尚未初始化
        eprintln!("加载配置失败，使用内建默认值: {err}");
        AppConfig::default()
    })
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    if fmt().with_env_filter(filter).try_init().is_err() {
        warn!("日志订阅者已存在");
    }
}
