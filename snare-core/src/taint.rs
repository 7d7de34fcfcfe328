// Payload and tracker tables

use crate::form::{ElementKey, ElementKind, Form, FormIdentity};
use crate::graph::{EdgeId, Graph};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

pub const MARKER_PLACEHOLDER: &str = "%RAND";

pub const PAYLOAD_TEMPLATES: [&str; 7] = [
    "<script>xss(%RAND)</script>",
    "\"'><script>xss(%RAND)</script>",
    "<img src=\"x\" onerror=\"xss(%RAND)\">",
    "<a href=\"\" jaekpot-attribute=\"%RAND\">jaekpot</a>",
    "x\" jaekpot-attribute=\"%RAND\" fix=\" ",
    "x\" onerror=\"xss(%RAND)\"",
    "</title></option><script>xss(%RAND)</script>",
];

pub const FILE_PAYLOAD_TEMPLATE: &str = "<img src=x onerror=xss(%RAND)>";

const SAFE_TYPES: &[&str] = &["text", "textarea", "password", "email"];
const AGGRESSIVE_VALUE_TYPES: &[&str] = &["text", "textarea", "password", "email", "hidden"];
const AGGRESSIVE_ONLY_TYPES: &[&str] = &["hidden", "radio", "checkbox", "select", "file"];
const TRACKED_TYPES: &[&str] = &["text", "textarea"];
const TRACKER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackMode {
    /// Only free-text inputs.
    Safe,
    /// Also hidden fields, radio/checkbox/select overrides and file inputs.
    Aggressive,
}

impl AttackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackMode::Safe => "safe",
            AttackMode::Aggressive => "aggressive",
        }
    }
}

/// Where an injected value entered the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionVector {
    Form(FormIdentity),
    FormEdge { edge: EdgeId, form: FormIdentity },
    Query { url: String },
}

impl InjectionVector {
    pub fn kind(&self) -> &'static str {
        match self {
            InjectionVector::Form(_) => "form",
            InjectionVector::FormEdge { .. } => "form_edge",
            InjectionVector::Query { .. } => "query",
        }
    }

    /// URL the value was sent to.
    pub fn target(&self) -> &str {
        match self {
            InjectionVector::Form(form) | InjectionVector::FormEdge { form, .. } => &form.action,
            InjectionVector::Query { url } => url,
        }
    }
}

impl fmt::Display for InjectionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InjectionVector::Form(form) => write!(f, "form {} {}", form.method, form.action),
            InjectionVector::FormEdge { edge, form } => {
                write!(f, "form edge #{} {} {}", edge.index(), form.method, form.action)
            }
            InjectionVector::Query { url } => write!(f, "query {}", url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Field(ElementKey),
    Query(String),
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Field(key) => fmt::Display::fmt(key, f),
            Parameter::Query(name) => write!(f, "?{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub vector: InjectionVector,
    pub parameter: Parameter,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct TrackingRecord {
    pub injected: Injection,
    /// `(url, location)` pairs where the marker was seen again.
    pub reflected: BTreeSet<(String, String)>,
}

impl TrackingRecord {
    fn new(injected: Injection) -> Self {
        Self {
            injected,
            reflected: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TaintTracker {
    attack_lookup_table: BTreeMap<String, TrackingRecord>,
    io_graph: BTreeMap<String, TrackingRecord>,
    attacked_forms: HashMap<FormIdentity, u32>,
}

impl TaintTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitutes a fresh numeric marker into `template`.
    pub fn arm_payload(&self, template: &str) -> (String, String) {
        let lookup_id = rand::rng().random_range(1..=100_000_000u32).to_string();
        let payload = template.replace(MARKER_PLACEHOLDER, &lookup_id);
        (lookup_id, payload)
    }

    pub fn use_payload(&mut self, lookup_id: impl fmt::Display, injection: Injection) {
        self.attack_lookup_table
            .insert(lookup_id.to_string(), TrackingRecord::new(injection));
    }

    /// Arms `form` with payloads built from `template`. Returns how many
    /// elements were injected; aggressive mode is a no-op for forms that
    /// have nothing beyond free-text inputs.
    pub fn fix_form(&mut self, form: &mut Form, template: &str, mode: AttackMode) -> usize {
        let need_aggressive = form.contains_type(AGGRESSIVE_ONLY_TYPES);
        if mode == AttackMode::Aggressive && !need_aggressive {
            debug!("Skipping aggressive attack on {}, nothing to gain", form);
            return 0;
        }

        let identity = form.identity();
        let mut armed = Vec::new();

        for (key, element) in form.inputs_mut() {
            let types: &[&str] = match mode {
                AttackMode::Safe => SAFE_TYPES,
                AttackMode::Aggressive => AGGRESSIVE_VALUE_TYPES,
            };

            if key.is_type(types) {
                let (lookup_id, payload) = self.arm_payload(template);
                element.value = Some(payload.clone());
                armed.push((lookup_id, key.clone(), payload));
            } else if mode == AttackMode::Aggressive && key.is_type(&["radio", "checkbox", "select"]) {
                let (lookup_id, payload) = self.arm_payload(template);
                element.override_value = payload.clone();
                // A radio only submits its value when clicked.
                if let ElementKind::Radio { click } = &mut element.kind {
                    *click = true;
                }
                armed.push((lookup_id, key.clone(), payload));
            } else if mode == AttackMode::Aggressive && key.is_type(&["file"]) {
                let (lookup_id, payload) = self.arm_payload(FILE_PAYLOAD_TEMPLATE);
                element.value = Some(payload.clone());
                armed.push((lookup_id, key.clone(), payload));
            } else {
                debug!("{}: Ignore parameter {}", mode.as_str().to_uppercase(), key);
            }
        }

        let count = armed.len();
        for (lookup_id, key, payload) in armed {
            self.use_payload(
                lookup_id,
                Injection {
                    vector: InjectionVector::Form(identity.clone()),
                    parameter: Parameter::Field(key),
                    payload,
                },
            );
        }
        count
    }

    /// Eight random lowercase letters.
    pub fn get_tracker(&self) -> String {
        let mut rng = rand::rng();
        (0..TRACKER_LEN)
            .map(|_| rng.random_range(b'a'..=b'z') as char)
            .collect()
    }

    pub fn use_tracker(&mut self, tracker: impl Into<String>, injection: Injection) {
        self.io_graph
            .insert(tracker.into(), TrackingRecord::new(injection));
    }

    /// Writes a fresh tracker into every text input of every form edge on
    /// `path`, directly in the graph so that replaying the path submits
    /// them. Returns the number of trackers armed.
    pub fn arm_form_trackers(&mut self, graph: &mut Graph, path: &[EdgeId]) -> usize {
        let mut count = 0;
        for &edge in path {
            let mut armed = Vec::new();
            let identity = {
                let Some(form) = graph.form_mut(edge) else {
                    continue;
                };
                for (key, element) in form.inputs_mut() {
                    if key.is_type(TRACKED_TYPES) {
                        let tracker = self.get_tracker();
                        element.value = Some(tracker.clone());
                        armed.push((tracker, key.clone()));
                    }
                }
                form.identity()
            };

            for (tracker, key) in armed {
                self.use_tracker(
                    tracker.clone(),
                    Injection {
                        vector: InjectionVector::FormEdge {
                            edge,
                            form: identity.clone(),
                        },
                        parameter: Parameter::Field(key),
                        payload: tracker,
                    },
                );
                count += 1;
            }
        }
        info!("Armed {} trackers over {} edges", count, path.len());
        count
    }

    /// Records that `form` has been handed to the tracking flow. Returns
    /// false if it had been already.
    pub fn mark_attacked(&mut self, form: &Form) -> bool {
        let count = self.attacked_forms.entry(form.identity()).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn is_attacked(&self, form: &Form) -> bool {
        self.attacked_forms.contains_key(&form.identity())
    }

    pub fn attacked_form_count(&self) -> usize {
        self.attacked_forms.len()
    }

    pub fn reflected_payload(
        &mut self,
        lookup_id: impl fmt::Display,
        url: &str,
        location: &str,
    ) -> bool {
        let key = lookup_id.to_string();
        match self.attack_lookup_table.get_mut(&key) {
            Some(record) => {
                record
                    .reflected
                    .insert((url.to_string(), location.to_string()));
                true
            }
            None => {
                warn!(
                    "Could not find lookup_id {}, perhaps from an older attack session?",
                    key
                );
                false
            }
        }
    }

    pub fn reflected_tracker(&mut self, tracker: &str, url: &str, location: &str) -> bool {
        match self.io_graph.get_mut(tracker) {
            Some(record) => {
                record
                    .reflected
                    .insert((url.to_string(), location.to_string()));
                true
            }
            None => {
                warn!("Could not find tracker {}", tracker);
                false
            }
        }
    }

    /// Lookup by marker id. Numeric and string forms are equivalent.
    pub fn get_table_entry(&self, lookup_id: impl fmt::Display) -> Option<&TrackingRecord> {
        let key = lookup_id.to_string();
        let entry = self.attack_lookup_table.get(&key);
        if entry.is_none() {
            warn!("Could not find lookup_id {}", key);
        }
        entry
    }

    pub fn get_tracker_entry(&self, tracker: &str) -> Option<&TrackingRecord> {
        self.io_graph.get(tracker)
    }

    /// Every armed marker and tracker, for the reflection observer.
    pub fn markers(&self) -> Vec<String> {
        self.attack_lookup_table
            .keys()
            .chain(self.io_graph.keys())
            .cloned()
            .collect()
    }

    /// Routes an observed marker to whichever table it belongs to.
    pub fn observe(&mut self, marker: &str, url: &str, location: &str) -> bool {
        if self.attack_lookup_table.contains_key(marker) {
            self.reflected_payload(marker, url, location)
        } else if self.io_graph.contains_key(marker) {
            self.reflected_tracker(marker, url, location)
        } else {
            warn!("Observed unknown marker {}", marker);
            false
        }
    }

    pub fn payloads(&self) -> impl Iterator<Item = (&String, &TrackingRecord)> {
        self.attack_lookup_table.iter()
    }

    pub fn trackers(&self) -> impl Iterator<Item = (&String, &TrackingRecord)> {
        self.io_graph.iter()
    }

    pub fn payload_count(&self) -> usize {
        self.attack_lookup_table.len()
    }

    pub fn tracker_count(&self) -> usize {
        self.io_graph.len()
    }

    pub fn reflection_count(&self) -> usize {
        self.attack_lookup_table
            .values()
            .chain(self.io_graph.values())
            .map(|r| r.reflected.len())
            .sum()
    }
}
