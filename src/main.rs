// ==========================================
// 铁路容量分配系统 - 主入口
// ==========================================
// 职责: 初始化数据库与配置, 周期性执行冲突扫描
// 用法: rail-capacity-alloc [db_path]
// ==========================================

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use rail_capacity_alloc::api::ConflictApi;
use rail_capacity_alloc::config::ConfigManager;
use rail_capacity_alloc::engine::AllocationRepositories;
use rail_capacity_alloc::{db, logging};

/// 默认数据库路径
///
/// 优先级: 环境变量 RAIL_CAPACITY_DB_PATH > 用户数据目录 > 当前目录
fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("RAIL_CAPACITY_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./rail_capacity_alloc.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("rail-capacity-alloc");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, dir = %dir.display(), "无法创建数据目录, 使用当前目录");
        } else {
            path = dir.join("rail_capacity_alloc.db");
        }
    }
    path.to_string_lossy().to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", rail_capacity_alloc::APP_NAME, rail_capacity_alloc::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);
    tracing::info!(db_path = %db_path, "使用数据库");

    let conn = db::open_shared_connection(&db_path)
        .with_context(|| format!("无法打开数据库: {}", db_path))?;
    {
        let guard = conn
            .lock()
            .map_err(|e| anyhow::anyhow!("数据库锁获取失败: {}", e))?;
        db::init_schema(&guard).context("数据库结构初始化失败")?;
    }

    let config = ConfigManager::from_connection(conn.clone())?;
    let interval_secs = config.get_sweep_interval_secs()?;
    let page_size = config.get_sweep_page_size()?;
    let actor = config.get_default_actor()?;
    tracing::info!(interval_secs, page_size, actor = %actor, "冲突扫描已启动");

    let api = ConflictApi::with_sweep_page_size(AllocationRepositories::from_connection(conn), page_size);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match api.sweep(&actor) {
                    Ok(report) => tracing::info!(
                        changed = report.has_changes(),
                        pot_new = report.pot.new,
                        slot_new = report.slot.new,
                        auto_resolved = report.pot.auto_resolved + report.slot.auto_resolved,
                        groups = report.groups,
                        "冲突扫描完成"
                    ),
                    Err(e) => tracing::error!(error = %e, code = e.code(), "冲突扫描失败"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到退出信号, 停止冲突扫描");
                break;
            }
        }
    }
    Ok(())
}
