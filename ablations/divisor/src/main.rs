//! 比较在线均值递推式的两种除数: 字面的 `i + 1` 与算术平均的 `i`.
//!
//! 读取 `$BRAIN_BERRY_TRACE_DIR` (或 `$HOME/dataset/brain-age/traces`)
//! 下记录的逐模拟预测, 对每个记录分别聚合并比较中位数.

mod result;
mod runner;

fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();

    match runner::run() {
        Ok(result) => result.analyze(),
        Err(e) => log::error!("ablation aborted: {e}"),
    }
}
