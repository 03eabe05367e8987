//! Mapping schedule names to concrete agent handles.
//!
//! Hand-rolled over `&str` splitting, in the same spirit as this crate's
//! existing preference for manual parsing over a grammar dependency (the
//! closest precedent being the brace-counting tool-call extraction this
//! lineage uses elsewhere) — the name grammar here is simple enough that a
//! parser combinator or regex crate would be pure overhead.

use std::collections::HashMap;

use crate::oasis::collaborators::ExpertPresetStore;
use crate::oasis::ids::short_id;

/// Temperature used for a direct/session call when no preset supplies one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// The resolved form of a schedule name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Direct,
    OasisSession,
    RegularSession,
    External,
}

/// A fully resolved agent, ready to be turned into a dispatchable
/// [`crate::oasis::agent::Agent`].
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub kind: AgentKind,
    pub display_name: String,
    /// Preset key; empty for `RegularSession`.
    pub tag: String,
    /// System-prompt fragment; non-empty for `Direct`/`OasisSession` when
    /// the tag resolves in the preset store.
    pub persona: String,
    /// Opaque session identifier; empty for `Direct`/`External`.
    pub session_id: String,
    /// `Direct` only; distinguishes otherwise-identical direct agents.
    pub instance_number: u32,
    /// `External` only; the id used to look up endpoint config.
    pub external_id: String,
    /// The original schedule-name literal this handle was resolved from.
    pub source_name: String,
    /// Completion temperature; from the preset when one resolves, else
    /// [`DEFAULT_TEMPERATURE`].
    pub temperature: f32,
}

struct Classified {
    kind: AgentKind,
    head: String,
    rest: String,
    instance_number: u32,
    external_id: String,
}

/// Parse the `#`-delimited name grammar described in the external
/// interfaces: `tag#temp#N | tag#oasis#ID | tag#ext#ID | Title#session_id`,
/// any of which may carry a trailing `#new`.
fn classify(raw: &str) -> Option<Classified> {
    if !raw.contains('#') {
        return None;
    }

    let (name, force_new) = match raw.strip_suffix("#new") {
        Some(stripped) => (stripped, true),
        None => (raw, false),
    };

    let (head, rest) = name.split_once('#')?;

    let mut rest = rest.to_string();
    if force_new {
        rest = replace_identifier_segment(&rest, &short_id());
    }

    if let Some(tail) = rest.strip_prefix("temp#") {
        let instance_number = tail.parse::<u32>().unwrap_or(1);
        return Some(Classified {
            kind: AgentKind::Direct,
            head: head.to_string(),
            rest,
            instance_number,
            external_id: String::new(),
        });
    }

    if rest.starts_with("oasis#") || rest.contains("#oasis#") {
        return Some(Classified {
            kind: AgentKind::OasisSession,
            head: head.to_string(),
            rest,
            instance_number: 1,
            external_id: String::new(),
        });
    }

    if let Some(tail) = rest.strip_prefix("ext#") {
        return Some(Classified {
            external_id: tail.to_string(),
            kind: AgentKind::External,
            head: head.to_string(),
            rest,
            instance_number: 1,
        });
    }

    Some(Classified {
        kind: AgentKind::RegularSession,
        head: head.to_string(),
        rest,
        instance_number: 1,
        external_id: String::new(),
    })
}

/// Replace the trailing identifier segment of a `#`-joined `rest` string
/// (the part after the last `#`, e.g. the session/external id) with a fresh
/// token, guaranteeing non-reuse for `#new` names.
fn replace_identifier_segment(rest: &str, fresh_token: &str) -> String {
    match rest.rfind('#') {
        Some(idx) => format!("{}#{}", &rest[..idx], fresh_token),
        None => fresh_token.to_string(),
    }
}

/// Resolve one schedule-name literal into an [`AgentHandle`], consulting
/// the preset store for `Direct`/`OasisSession`/`External` tags. Returns
/// `None` for names with no `#` — callers should drop these with a warning
/// and exclude them from the pool.
pub async fn resolve_name(
    raw: &str,
    owner: &str,
    presets: &dyn ExpertPresetStore,
) -> Option<AgentHandle> {
    let classified = classify(raw)?;

    let (display_name, persona, temperature) = match classified.kind {
        AgentKind::Direct | AgentKind::OasisSession | AgentKind::External => {
            match presets.lookup_by_tag(&classified.head, owner).await {
                Some(preset) => (preset.display_name, preset.persona, preset.temperature),
                None => (classified.head.clone(), String::new(), DEFAULT_TEMPERATURE),
            }
        }
        AgentKind::RegularSession => (classified.head.clone(), String::new(), DEFAULT_TEMPERATURE),
    };

    let session_id = match classified.kind {
        AgentKind::Direct | AgentKind::External => String::new(),
        // The oasis-session id is addressed as `tag#oasis#id` in the sibling
        // collaborator, so the tag prefix has to be carried along — `rest`
        // alone is just `oasis#id` and doesn't even contain `#oasis#`.
        AgentKind::OasisSession => format!("{}#{}", classified.head, classified.rest),
        AgentKind::RegularSession => classified.rest.clone(),
    };

    Some(AgentHandle {
        kind: classified.kind,
        display_name,
        tag: classified.head,
        persona,
        session_id,
        instance_number: classified.instance_number,
        external_id: classified.external_id,
        source_name: raw.to_string(),
        temperature,
    })
}

/// Resolve a schedule's referenced-name set into an ordered, de-duplicated
/// pool plus a lookup map keyed by every alias a later step might use:
/// full original name, display name (first-come-wins), tag, and session id.
pub async fn build_pool(
    names: &[String],
    owner: &str,
    presets: &dyn ExpertPresetStore,
) -> (Vec<AgentHandle>, HashMap<String, usize>) {
    let mut pool = Vec::new();
    let mut lookup: HashMap<String, usize> = HashMap::new();

    for raw in names {
        let handle = match resolve_name(raw, owner, presets).await {
            Some(h) => h,
            None => {
                log::warn!("resolver: dropping unresolvable agent name '{}'", raw);
                continue;
            }
        };

        let idx = pool.len();
        lookup.entry(handle.source_name.clone()).or_insert(idx);
        lookup.entry(handle.display_name.clone()).or_insert(idx);
        if !handle.tag.is_empty() {
            lookup.entry(handle.tag.clone()).or_insert(idx);
        }
        if !handle.session_id.is_empty() {
            lookup.entry(handle.session_id.clone()).or_insert(idx);
        }
        pool.push(handle);
    }

    (pool, lookup)
}

/// Resolve a single step-time reference (e.g. an `Expert` step's name)
/// against the pool's lookup map, by priority: full name > display name >
/// tag > session id. The lookup map already encodes that priority via
/// first-come-wins insertion order built from the pool itself, so a plain
/// key lookup is correct here.
pub fn lookup<'a>(pool: &'a [AgentHandle], lookup_map: &HashMap<String, usize>, name: &str) -> Option<&'a AgentHandle> {
    lookup_map.get(name).and_then(|&idx| pool.get(idx))
}
