//! 委派工作栈
//!
//! 编排器不递归调用自身，而是从栈中取出 (agent, task, depth) 帧逐个执行；
//! 起始 Agent 深度为 0，每次委派深度加 1，深度超过上限时拒绝入栈并返回 DelegationTooDeep。

use crate::agent::{AgentType, Delegation};
use crate::core::AgentError;

pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct DelegationFrame {
    pub agent: AgentType,
    /// 起始帧为 None
    pub task: Option<String>,
    pub depth: usize,
    pub from: Option<AgentType>,
}

#[derive(Debug)]
pub struct DelegationStack {
    frames: Vec<DelegationFrame>,
    max_depth: usize,
    path: Vec<AgentType>,
}

impl DelegationStack {
    pub fn new(start: AgentType, max_depth: usize) -> Self {
        Self {
            frames: vec![DelegationFrame {
                agent: start,
                task: None,
                depth: 0,
                from: None,
            }],
            max_depth,
            path: vec![start],
        }
    }

    pub fn pop(&mut self) -> Option<DelegationFrame> {
        self.frames.pop()
    }

    /// 在 current 之后压入委派目标；超出深度上限时返回错误且不入栈
    pub fn delegate(&mut self, current: &DelegationFrame, delegation: &Delegation) -> Result<DelegationFrame, AgentError> {
        let depth = current.depth + 1;
        if depth > self.max_depth {
            tracing::warn!(
                path = %self.path_string(),
                attempted = depth,
                max = self.max_depth,
                "delegation depth exceeded"
            );
            return Err(AgentError::DelegationTooDeep {
                attempted: depth,
                max: self.max_depth,
            });
        }
        let frame = DelegationFrame {
            agent: delegation.target,
            task: Some(delegation.task.clone()),
            depth,
            from: Some(current.agent),
        };
        self.path.push(delegation.target);
        self.frames.push(frame.clone());
        Ok(frame)
    }

    /// 已经过的 Agent 序列（含起始 Agent）
    pub fn path(&self) -> &[AgentType] {
        &self.path
    }

    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to(target: AgentType) -> Delegation {
        Delegation {
            target,
            task: "t".into(),
            reason: None,
        }
    }

    #[test]
    fn test_fourth_hop_is_rejected() {
        let mut stack = DelegationStack::new(AgentType::Orchestrator, DEFAULT_MAX_DELEGATION_DEPTH);
        let chain = [AgentType::Essay, AgentType::Orchestrator, AgentType::Essay, AgentType::Orchestrator];
        let mut hops = 0;
        let mut err = None;
        while let Some(frame) = stack.pop() {
            match stack.delegate(&frame, &to(chain[hops])) {
                Ok(next) => {
                    hops += 1;
                    assert_eq!(next.depth, hops);
                }
                Err(e) => {
                    err = Some(e);
                    break;
                }
            }
        }
        assert_eq!(hops, 3);
        assert!(matches!(err, Some(AgentError::DelegationTooDeep { attempted: 4, max: 3 })));
        assert_eq!(stack.path().len(), 4);
        assert_eq!(stack.path_string(), "orchestrator -> essay -> orchestrator -> essay");
    }

    #[test]
    fn test_zero_depth_forbids_delegation() {
        let mut stack = DelegationStack::new(AgentType::School, 0);
        let frame = stack.pop().unwrap();
        assert!(stack.delegate(&frame, &to(AgentType::Case)).is_err());
        assert!(stack.pop().is_none());
    }
}
