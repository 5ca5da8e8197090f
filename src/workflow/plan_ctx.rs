//! 步骤执行上下文
//!
//! 封装"我正在执行哪次运行的第几步"这一信息

use std::fmt::Display;

/// 步骤执行上下文
#[derive(Debug, Clone)]
pub struct PlanContext {
    /// 运行 ID
    pub run_id: String,

    /// 计划所属的县（用于限流）
    pub county: String,

    /// 步骤在计划中的序号（从1开始，仅用于日志显示）
    pub step_index: usize,

    /// 计划步骤总数
    pub total_steps: usize,
}

impl PlanContext {
    pub fn new(run_id: impl Into<String>, county: impl Into<String>, total_steps: usize) -> Self {
        Self {
            run_id: run_id.into(),
            county: county.into(),
            step_index: 0,
            total_steps,
        }
    }

    /// 指向第 `index` 步（从 0 开始）的上下文
    pub fn at(&self, index: usize) -> Self {
        Self {
            step_index: index + 1,
            ..self.clone()
        }
    }
}

impl Display for PlanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[运行 {} | 步骤 {}/{}]",
            self.run_id, self.step_index, self.total_steps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_one_based() {
        let ctx = PlanContext::new("exec_1", "charleston", 13).at(0);
        assert_eq!(ctx.to_string(), "[运行 exec_1 | 步骤 1/13]");
    }
}
