//! 消融实验依赖的通用组件.

use brain_berry::aggregate::PredictionTrace;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 简单分隔线.
#[inline]
pub fn sep_to<W: std::io::Write>(mut w: W) -> std::io::Result<()> {
    writeln!(&mut w, "{SEP}")
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 模拟数不少于 `min_simulations` 的记录才能区分两种聚合方式.
#[inline]
pub fn is_informative(trace: &PredictionTrace, min_simulations: usize) -> bool {
    trace.len() >= min_simulations.max(2)
}
