// Session contracts used by the crawl engine

use crate::error::Result;
use snare_core::{Cookie, Event, Form, Iframe, Request, UiForm};

/// Everything harvested from one page state.
#[derive(Debug, Clone, Default)]
pub struct PageFacts {
    pub urls: Vec<Request>,
    pub forms: Vec<Form>,
    pub events: Vec<Event>,
    pub iframes: Vec<Iframe>,
    pub ui_forms: Vec<UiForm>,
}

impl PageFacts {
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
            && self.forms.is_empty()
            && self.events.is_empty()
            && self.iframes.is_empty()
            && self.ui_forms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.urls.len() + self.forms.len() + self.events.len() + self.iframes.len() + self.ui_forms.len()
    }
}

/// A marker seen in the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub marker: String,
    /// Where in the page it was found, e.g. `script`, `attribute:href`, `text`.
    pub location: String,
}

#[allow(async_fn_in_trait)]
pub trait Driver {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn fill_and_submit(&mut self, form: &Form) -> Result<()>;

    async fn submit_ui_form(&mut self, ui_form: &UiForm) -> Result<()>;

    /// Fires a DOM event. Callers dismiss any alert it leaves behind.
    async fn dispatch(&mut self, event: &Event) -> Result<()>;

    async fn enter_iframe(&mut self, iframe: &Iframe) -> Result<()>;

    async fn run_script(&mut self, code: &str) -> Result<()>;

    fn cookies(&self) -> Vec<Cookie>;

    /// Returns true if an alert was open.
    async fn dismiss_alert(&mut self) -> bool;

    fn current_url(&self) -> String;

    /// Whether the page still has asynchronous work in flight.
    async fn need_to_wait(&mut self) -> Result<bool>;
}

#[allow(async_fn_in_trait)]
pub trait Extractor {
    async fn extract(&mut self) -> Result<PageFacts>;

    async fn observe_markers(&mut self, markers: &[String]) -> Vec<Observation>;
}
