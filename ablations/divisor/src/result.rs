//! 实验结果.

use std::io::{self, Write};
use std::path::PathBuf;

/// 一份记录上两种聚合方式的对比.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    /// 模拟个数.
    pub simulations: usize,

    /// 切片个数.
    pub slices: usize,

    /// 字面递推式 (除数 `i + 1`) 得到的脑龄.
    pub literal: f64,

    /// 算术平均得到的脑龄.
    pub mean: f64,
}

impl Comparison {
    /// 两种聚合方式的绝对差.
    #[inline]
    pub fn gap(&self) -> f64 {
        (self.literal - self.mean).abs()
    }
}

/// 将 `c` 的结果写进 `w` 中.
fn describe_into<W: Write>(name: &str, c: &Comparison, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    writeln!(w, "Trace `{name}`:")?;
    writeln!(w, "{S4}Simulations: {}", c.simulations)?;
    writeln!(w, "{S4}Slices: {}", c.slices)?;
    writeln!(w, "{S4}Literal recurrence: {:.6}", c.literal)?;
    writeln!(w, "{S4}Arithmetic mean: {:.6}", c.mean)?;
    write!(w, "{S4}Absolute gap: {:.6}", c.gap())?;
    Ok(())
}

/// 一个记录文件的处理结果. 失败时保留原因.
pub type Outcome = (PathBuf, Result<Comparison, String>);

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<Outcome>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = Outcome>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 所有成功对比的平均绝对差与最大绝对差.
    pub fn summary(&self) -> Option<(f64, f64)> {
        let gaps: Vec<f64> = self
            .data
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok().map(Comparison::gap))
            .collect();
        if gaps.is_empty() {
            return None;
        }
        let avg = gaps.iter().sum::<f64>() / gaps.len() as f64;
        let max = gaps.iter().copied().fold(0.0, f64::max);
        Some((avg, max))
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (path, r) in self.data.iter() {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            match r {
                Ok(c) => {
                    if describe_into(&name, c, &mut buf).is_ok() {
                        println!("{}", String::from_utf8_lossy(&buf));
                    }
                    buf.clear();
                }
                Err(e) => println!("Trace `{name}` skipped: {e}"),
            }
            utils::sep();
        }

        match self.summary() {
            Some((avg, max)) => println!("Average gap: {avg:.6}, largest gap: {max:.6}"),
            None => println!("No comparable traces."),
        }
    }
}
