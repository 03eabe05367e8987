//! Parsing a YAML schedule document into a typed [`Schedule`].
//!
//! Deserializes into an intermediate "raw" shape that mirrors the exact YAML
//! keys bit-for-bit, then validates and converts into the typed step tree.
//! Malformed shape of any kind becomes [`Error::BadSchedule`]; unknown map
//! keys are ignored (serde's default permissive behavior, no
//! `deny_unknown_fields`).

use serde::Deserialize;

use crate::oasis::error::{Error, Result};

/// One member reference inside a `parallel:` list — either a bare name
/// string, or a map carrying `expert`/`instruction`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawParallelMember {
    Name(String),
    WithInstruction {
        expert: String,
        #[serde(default)]
        instruction: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawManual {
    author: String,
    content: String,
    #[serde(default)]
    reply_to: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawStep {
    #[serde(default)]
    expert: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    parallel: Option<Vec<RawParallelMember>>,
    #[serde(default)]
    all_experts: Option<bool>,
    #[serde(default)]
    manual: Option<RawManual>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSchedule {
    version: i64,
    #[serde(default = "default_repeat")]
    repeat: bool,
    #[serde(default)]
    discussion: Option<bool>,
    #[serde(default)]
    plan: Option<Vec<RawStep>>,
}

fn default_repeat() -> bool {
    true
}

/// A resolved schedule member reference: an agent name plus an optional
/// per-step instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub instruction: Option<String>,
}

/// One unit of the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Expert {
        name: String,
        instruction: Option<String>,
    },
    Parallel {
        members: Vec<Member>,
    },
    All {
        instruction: Option<String>,
    },
    Manual {
        author: String,
        content: String,
        reply_to: Option<u64>,
    },
}

/// A parsed, validated execution plan.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub version: i64,
    pub repeat: bool,
    pub discussion_mode_default: Option<bool>,
    pub steps: Vec<Step>,
}

impl Schedule {
    /// Parse a YAML document into a typed `Schedule`.
    pub fn parse(yaml: &str) -> Result<Schedule> {
        let raw: RawSchedule = serde_yaml::from_str(yaml)
            .map_err(|e| Error::BadSchedule(format!("invalid yaml: {}", e)))?;

        if raw.version != 1 {
            return Err(Error::BadSchedule(format!(
                "unsupported schedule version: {}",
                raw.version
            )));
        }

        let raw_plan = raw
            .plan
            .ok_or_else(|| Error::BadSchedule("missing 'plan'".to_string()))?;

        let mut steps = Vec::with_capacity(raw_plan.len());
        for (idx, raw_step) in raw_plan.into_iter().enumerate() {
            steps.push(convert_step(idx, raw_step)?);
        }

        Ok(Schedule {
            version: raw.version,
            repeat: raw.repeat,
            discussion_mode_default: raw.discussion,
            steps,
        })
    }

    /// The ordered, de-duplicated set of non-manual agent-name literals
    /// referenced anywhere in the plan, in first-appearance order — used by
    /// the resolver to build the agent pool.
    pub fn referenced_agent_names(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut ordered = Vec::new();
        let mut push = |name: &str| {
            if seen.insert(name.to_string()) {
                ordered.push(name.to_string());
            }
        };
        for step in &self.steps {
            match step {
                Step::Expert { name, .. } => push(name),
                Step::Parallel { members } => {
                    for m in members {
                        push(&m.name);
                    }
                }
                Step::All { .. } | Step::Manual { .. } => {}
            }
        }
        ordered
    }
}

fn convert_step(idx: usize, raw: RawStep) -> Result<Step> {
    let present = [
        raw.expert.is_some(),
        raw.parallel.is_some(),
        raw.all_experts.is_some(),
        raw.manual.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();

    if present != 1 {
        return Err(Error::BadSchedule(format!(
            "plan[{}] must contain exactly one of expert/parallel/all_experts/manual",
            idx
        )));
    }

    if let Some(name) = raw.expert {
        return Ok(Step::Expert {
            name,
            instruction: raw.instruction,
        });
    }

    if let Some(members) = raw.parallel {
        let converted = members
            .into_iter()
            .map(|m| match m {
                RawParallelMember::Name(name) => Member {
                    name,
                    instruction: None,
                },
                RawParallelMember::WithInstruction { expert, instruction } => Member {
                    name: expert,
                    instruction,
                },
            })
            .collect();
        return Ok(Step::Parallel { members: converted });
    }

    if let Some(true) = raw.all_experts {
        return Ok(Step::All {
            instruction: raw.instruction,
        });
    }
    if let Some(false) = raw.all_experts {
        return Err(Error::BadSchedule(format!(
            "plan[{}]: all_experts must be true when present",
            idx
        )));
    }

    if let Some(manual) = raw.manual {
        return Ok(Step::Manual {
            author: manual.author,
            content: manual.content,
            reply_to: manual.reply_to,
        });
    }

    unreachable!("exactly-one check above guarantees one branch matched")
}
