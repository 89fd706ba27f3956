use anyhow::Result;
use colored_json::to_colored_json_auto;
use serde_json::Value;
use std::io::Write;
use sweetlatex::{ApiResponse, Paginated, Pagination};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn stderr_choice() -> ColorChoice {
    if atty::is(atty::Stream::Stderr) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

fn stdout_choice() -> ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

/// Counterpart of the storefront's "flash" banner: shown whenever the server faults.
pub fn pp_server_fault(resp: &ApiResponse) -> Result<()> {
    let mut stderr = StandardStream::stderr(stderr_choice());
    stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
    writeln!(
        &mut stderr,
        "An unexpected error has occurred. Please try again later."
    )?;
    stderr.reset()?;
    stderr.set_color(ColorSpec::new().set_dimmed(true))?;
    writeln!(&mut stderr, "  status {}: {}", resp.status, resp.error_message())?;
    stderr.reset()?;
    Ok(())
}

/// Prints the body as JSON on stdout; failures also get a one-line summary on stderr.
pub fn pp_response(resp: &ApiResponse) -> Result<()> {
    if !resp.ok {
        let mut stderr = StandardStream::stderr(stderr_choice());
        stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
        write!(&mut stderr, "HTTP {}", resp.status)?;
        stderr.reset()?;
        writeln!(&mut stderr, " {}", resp.error_message())?;
    }
    if let Some(val) = &resp.body {
        writeln!(&mut std::io::stdout(), "{}", to_colored_json_auto(val)?)?
    };
    Ok(())
}

/// Short label for one item of a listing: whichever naming field the resource has.
fn item_label(item: &Value) -> String {
    for key in ["title", "name", "username", "email"] {
        if let Some(s) = item[key].as_str() {
            return s.to_string();
        }
    }
    "".to_string()
}

pub fn pp_listing(page: &Paginated<Value>) -> Result<()> {
    let mut stdout = StandardStream::stdout(stdout_choice());
    for item in page.data.iter() {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true))?;
        let id = match &item["id"] {
            Value::Null => "-".to_string(),
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        };
        write!(&mut stdout, "{:>6}", id)?;
        stdout.reset()?;
        writeln!(&mut stdout, "  {:<60.60}", item_label(item))?;
    }
    if let Some(extra) = &page.extra_data {
        if let Some(total) = extra.get("total_price") {
            stdout.set_color(ColorSpec::new().set_bold(true))?;
            writeln!(&mut stdout, "total price: {}", total)?;
            stdout.reset()?;
        }
    }
    pp_pagination(&page.pagination)
}

pub fn pp_pagination(pag: &Pagination) -> Result<()> {
    let mut stderr = StandardStream::stderr(stderr_choice());
    stderr.set_color(ColorSpec::new().set_dimmed(true))?;
    write!(
        &mut stderr,
        "page {} of {} ({} total)",
        pag.page_number(),
        pag.page_count(),
        pag.total
    )?;
    if let Some(next) = pag.next_offset() {
        write!(&mut stderr, "; next page: --offset {next}")?;
    }
    writeln!(&mut stderr)?;
    stderr.reset()?;
    Ok(())
}

#[test]
fn test_item_label() {
    use serde_json::json;
    assert_eq!(item_label(&json!({"id": 1, "title": "Corset"})), "Corset");
    assert_eq!(item_label(&json!({"id": 1, "username": "susan"})), "susan");
    assert_eq!(item_label(&json!({"id": 1})), "");
}
