// Form model
//
// Inputs are stored as (ElementKey, FormElement) pairs. The key is the stable
// identity of an element and never changes once inserted; everything that
// gets armed or filled in lives in FormElement.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::error;

/// Stable identity of a form element: type and name, plus the value for
/// radio buttons (every option of a radio group is its own element).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementKey {
    itype: Option<String>,
    name: Option<String>,
    radio_value: Option<String>,
}

impl ElementKey {
    pub fn new(itype: Option<&str>, name: Option<&str>) -> Self {
        Self {
            itype: itype.map(String::from),
            name: name.map(String::from),
            radio_value: None,
        }
    }

    pub fn radio(name: Option<&str>, value: Option<&str>) -> Self {
        Self {
            itype: Some("radio".to_string()),
            name: name.map(String::from),
            radio_value: value.map(String::from),
        }
    }

    pub fn itype(&self) -> Option<&str> {
        self.itype.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_type(&self, types: &[&str]) -> bool {
        self.itype().is_some_and(|t| types.contains(&t))
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {})",
            self.itype().unwrap_or("None"),
            self.name().unwrap_or("None")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Input,
    Submit { use_: bool },
    Radio { click: bool },
    Select { options: Vec<String>, selected: Option<String> },
    Checkbox { checked: bool },
}

/// Mutable state of a form element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormElement {
    pub kind: ElementKind,
    pub value: Option<String>,
    /// Used when fuzzing radios, checkboxes and selects.
    pub override_value: String,
}

impl FormElement {
    fn new(kind: ElementKind, value: Option<&str>) -> Self {
        Self {
            kind,
            value: value.map(String::from),
            override_value: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FormInput {
    key: ElementKey,
    element: FormElement,
}

/// Hashable identity of a form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormIdentity {
    pub action: String,
    pub method: String,
    pub keys: BTreeSet<ElementKey>,
    pub submit: Option<ElementKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Form {
    pub action: String,
    pub method: String,
    inputs: Vec<FormInput>,
}

impl Form {
    pub fn new(action: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method: method.into(),
            inputs: Vec::new(),
        }
    }

    fn insert(&mut self, key: ElementKey, element: FormElement) -> &mut FormElement {
        let idx = match self.inputs.iter().position(|i| i.key == key) {
            Some(idx) => {
                self.inputs[idx].element = element;
                idx
            }
            None => {
                self.inputs.push(FormInput { key, element });
                self.inputs.len() - 1
            }
        };
        &mut self.inputs[idx].element
    }

    /// `<input>`
    pub fn add_input(
        &mut self,
        itype: Option<&str>,
        name: Option<&str>,
        value: Option<&str>,
        checked: bool,
    ) -> &mut FormElement {
        match itype {
            Some("radio") => self.insert(
                ElementKey::radio(name, value),
                FormElement::new(ElementKind::Radio { click: false }, value),
            ),
            Some("checkbox") => self.insert(
                ElementKey::new(itype, name),
                FormElement::new(ElementKind::Checkbox { checked }, value),
            ),
            Some("submit") => self.insert(
                ElementKey::new(itype, name),
                FormElement::new(ElementKind::Submit { use_: true }, value),
            ),
            _ => self.insert(
                ElementKey::new(itype, name),
                FormElement::new(ElementKind::Input, value),
            ),
        }
    }

    /// `<select>`
    pub fn add_select(&mut self, name: Option<&str>, options: Vec<String>) -> &mut FormElement {
        self.insert(
            ElementKey::new(Some("select"), name),
            FormElement::new(
                ElementKind::Select {
                    options,
                    selected: None,
                },
                None,
            ),
        )
    }

    /// `<textarea>`, which fills like a text input.
    pub fn add_textarea(&mut self, name: Option<&str>, value: Option<&str>) -> &mut FormElement {
        self.insert(
            ElementKey::new(Some("textarea"), name),
            FormElement::new(ElementKind::Input, value),
        )
    }

    /// `<button>`
    pub fn add_button(
        &mut self,
        itype: Option<&str>,
        name: Option<&str>,
        value: Option<&str>,
    ) -> &mut FormElement {
        if itype == Some("submit") {
            self.insert(
                ElementKey::new(itype, name),
                FormElement::new(ElementKind::Submit { use_: true }, value),
            )
        } else {
            error!("Unknown button {:?}", (itype, name, value));
            self.insert(
                ElementKey::new(itype, name),
                FormElement::new(ElementKind::Input, value),
            )
        }
    }

    /// Content-editable `<iframe>` body inside a form.
    pub fn add_iframe_body(&mut self, id: Option<&str>) -> &mut FormElement {
        self.insert(
            ElementKey::new(Some("iframe"), id),
            FormElement::new(ElementKind::Input, Some("")),
        )
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ElementKey> {
        self.inputs.iter().map(|i| &i.key)
    }

    pub fn inputs(&self) -> impl Iterator<Item = (&ElementKey, &FormElement)> {
        self.inputs.iter().map(|i| (&i.key, &i.element))
    }

    pub fn inputs_mut(&mut self) -> impl Iterator<Item = (&ElementKey, &mut FormElement)> {
        self.inputs.iter_mut().map(|i| (&i.key, &mut i.element))
    }

    pub fn element(&self, key: &ElementKey) -> Option<&FormElement> {
        self.inputs.iter().find(|i| &i.key == key).map(|i| &i.element)
    }

    pub fn element_mut(&mut self, key: &ElementKey) -> Option<&mut FormElement> {
        self.inputs
            .iter_mut()
            .find(|i| &i.key == key)
            .map(|i| &mut i.element)
    }

    /// Can we attack this form?
    pub fn attackable(&self) -> bool {
        self.keys()
            .any(|k| k.itype().is_none() || k.is_type(&["text", "password", "textarea"]))
    }

    pub fn contains_type(&self, types: &[&str]) -> bool {
        self.keys().any(|k| k.is_type(types))
    }

    /// A fillable form with a password field.
    pub fn is_login_form(&self) -> bool {
        self.attackable() && self.contains_type(&["password"])
    }

    fn active_submit(&self) -> Option<&ElementKey> {
        self.inputs
            .iter()
            .find(|i| matches!(i.element.kind, ElementKind::Submit { use_: true }))
            .map(|i| &i.key)
    }

    pub fn identity(&self) -> FormIdentity {
        FormIdentity {
            action: self.action.clone(),
            method: self.method.clone(),
            keys: self.keys().cloned().collect(),
            submit: self.active_submit().cloned(),
        }
    }

    /// One copy of the form per submit button, each with only that button
    /// in use. Forms with zero or one submit come back unchanged.
    pub fn submit_variants(&self) -> Vec<Form> {
        let submits: Vec<ElementKey> = self
            .inputs
            .iter()
            .filter(|i| matches!(i.element.kind, ElementKind::Submit { .. }))
            .map(|i| i.key.clone())
            .collect();

        if submits.len() < 2 {
            return vec![self.clone()];
        }

        submits
            .iter()
            .map(|chosen| {
                let mut variant = self.clone();
                for input in variant.inputs.iter_mut() {
                    if let ElementKind::Submit { use_ } = &mut input.element.kind {
                        *use_ = &input.key == chosen;
                    }
                }
                variant
            })
            .collect()
    }

    /// Fill the form with plausible values so a submit gets past basic
    /// client-side validation.
    pub fn fill_defaults(&mut self) {
        let mut clicked_radio_groups: BTreeSet<Option<String>> = BTreeSet::new();

        for input in self.inputs.iter_mut() {
            let key = &input.key;
            let element = &mut input.element;
            match &mut element.kind {
                ElementKind::Radio { click } => {
                    // First option of each group
                    if clicked_radio_groups.insert(key.name.clone()) {
                        *click = true;
                    }
                }
                ElementKind::Checkbox { checked } => *checked = true,
                ElementKind::Select { options, selected } => {
                    if selected.is_none() {
                        *selected = options.first().cloned();
                    }
                }
                ElementKind::Submit { .. } => {}
                ElementKind::Input => {
                    let is_numeric = element
                        .value
                        .as_deref()
                        .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()));
                    let filled = match key.itype() {
                        Some("text") | None if is_numeric => Some("1"),
                        Some("text") | None if key.name() == Some("email") => {
                            Some("jAEkPot@localhost.com")
                        }
                        Some("text") | Some("textarea") | Some("search") | None => Some("jAEkPot"),
                        Some("password") => Some("jAEkPot1"),
                        Some("email") => Some("jAEkPot@localhost.com"),
                        Some("number") | Some("range") => Some("1"),
                        Some("tel") => Some("0123456789"),
                        Some("url") => Some("http://localhost"),
                        Some("color") => Some("#ff0000"),
                        Some("date") => Some("2020-01-01"),
                        _ => None,
                    };
                    if let Some(v) = filled {
                        element.value = Some(v.to_string());
                    }
                }
            }
        }
    }

    /// Name/value pairs a browser would send when submitting the form.
    pub fn submission_values(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for input in &self.inputs {
            let Some(name) = input.key.name() else {
                continue;
            };
            let element = &input.element;
            let override_or = |fallback: Option<&str>| -> Option<String> {
                if !element.override_value.is_empty() {
                    Some(element.override_value.clone())
                } else {
                    fallback.map(String::from)
                }
            };
            let value = match &element.kind {
                _ if input.key.is_type(&["iframe"]) => None,
                ElementKind::Input => Some(element.value.clone().unwrap_or_default()),
                ElementKind::Submit { use_ } => {
                    use_.then(|| element.value.clone().unwrap_or_default())
                }
                ElementKind::Radio { click } => {
                    if *click {
                        override_or(element.value.as_deref())
                    } else {
                        None
                    }
                }
                ElementKind::Checkbox { checked } => {
                    if *checked {
                        override_or(element.value.as_deref().or(Some("on")))
                    } else {
                        None
                    }
                }
                ElementKind::Select { options, selected } => {
                    override_or(selected.as_deref().or(options.first().map(|o| o.as_str())))
                }
            };
            if let Some(value) = value {
                pairs.push((name.to_string(), value));
            }
        }
        pairs
    }
}

impl PartialEq for Form {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Form {}

impl Hash for Form {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Form({}, {}, {})", self.inputs.len(), self.action, self.method)
    }
}
