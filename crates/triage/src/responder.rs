//! The `Responder` seam (§4.H step 4): the pipeline writes a response body
//! through this trait and nothing else, so `triage` itself never depends on
//! any particular web framework. A host integration (see
//! `demos/axum-error-pipeline`) implements this trait over its own
//! request/response types.

use triage_core::ErrorRecord;

/// What the pipeline needs from a host framework's response object to
/// satisfy §4.H step 4. Implementations decide how `write_html`/`write_json`
/// map onto their own response type; `triage` never inspects the body after
/// handing it over.
pub trait Responder {
    /// Whether a response has already been sent on this exchange. The
    /// pipeline skips step 4 entirely when this is `true`.
    fn headers_sent(&self) -> bool;

    /// Whether the caller prefers an HTML error page over a JSON body
    /// (typically derived from the request's `Accept` header).
    fn prefers_html(&self) -> bool;

    /// Writes a safe HTML error page at `status_code`. `message` and `stack`
    /// are already escaped by the caller.
    fn write_html(&mut self, status_code: u16, message: &str, stack: &str);

    /// Writes a JSON body `{error: errorRecord}` at `status_code`.
    fn write_json(&mut self, status_code: u16, record: &ErrorRecord);
}

/// Escapes the five HTML-significant characters. Used to build the body
/// passed to [`Responder::write_html`] — not a general-purpose HTML encoder,
/// just enough to make error message/stack text safe to inline.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
