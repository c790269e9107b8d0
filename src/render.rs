//! HTML rendering for the browser chat page.
//!
//! Assistant text is Markdown; user text is shown literally. Raw HTML inside
//! assistant Markdown is escaped, so neither role can inject markup.

use pulldown_cmark::{html, Event, Options, Parser};

use crate::session::{ConversationState, Message, Role};

/// Models offered when the endpoint cannot list its own.
pub const FALLBACK_MODELS: &[&str] = &["llama3", "mistral", "llama2", "gemma"];

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn markdown_to_html(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(source, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        e => e,
    });
    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

pub fn render_message(message: &Message) -> String {
    match message.role {
        Role::Assistant => format!(
            r#"<div class="msg assistant"><div class="bubble markdown-content">{}</div></div>"#,
            markdown_to_html(&message.content)
        ),
        Role::User => format!(
            r#"<div class="msg user"><div class="bubble plain">{}</div></div>"#,
            escape_html(&message.content)
        ),
    }
}

pub fn render_transcript(messages: &[Message]) -> String {
    messages.iter().map(render_message).collect()
}

fn render_model_options(current: &str, models: &[String]) -> String {
    let mut names: Vec<&str> = models.iter().map(String::as_str).collect();
    if names.is_empty() {
        names.extend_from_slice(FALLBACK_MODELS);
    }
    if !names.contains(&current) {
        names.insert(0, current);
    }
    names
        .into_iter()
        .map(|name| {
            let selected = if name == current { " selected" } else { "" };
            format!(
                r#"<option value="{0}"{1}>{0}</option>"#,
                escape_html(name),
                selected
            )
        })
        .collect()
}

/// Full chat page. `busy` renders the input disabled and the loading indicator visible.
pub fn render_page(
    state: &ConversationState,
    models: &[String],
    error: Option<&str>,
    busy: bool,
) -> String {
    let error_box = match error {
        Some(e) => format!(r#"<div id="error" class="error">{}</div>"#, escape_html(e)),
        None => r#"<div id="error" class="error" hidden></div>"#.to_string(),
    };
    let disabled = if busy { " disabled" } else { "" };
    let loading = if busy { "" } else { " hidden" };
    let model_options = render_model_options(state.model(), models);
    let transcript = render_transcript(state.messages());
    fill_template(
        PAGE_TEMPLATE,
        &[
            ("MODEL_OPTIONS", model_options.as_str()),
            ("TRANSCRIPT", transcript.as_str()),
            ("ERROR", error_box.as_str()),
            ("DISABLED", disabled),
            ("LOADING", loading),
        ],
    )
}

/// Single pass over `{{NAME}}` slots, so substituted text is never rescanned.
fn fill_template(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = &after[..end];
                match slots.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

const PAGE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Juniper</title>
<style>
body { margin: 0; height: 100vh; display: flex; flex-direction: column; background: #1e1e1e; color: #fff; font-family: system-ui, sans-serif; }
header { display: flex; gap: 1rem; justify-content: flex-end; padding: .75rem 1rem; }
main { flex: 1; display: flex; flex-direction: column; overflow: hidden; max-width: 56rem; width: 100%; margin: 0 auto; padding: 1rem; box-sizing: border-box; }
#chat-container { flex: 1; overflow-y: auto; padding: 1rem; }
.msg { margin-bottom: 1rem; }
.msg.user { text-align: right; }
.bubble { display: inline-block; padding: .5rem 1rem; border-radius: .5rem; max-width: 48rem; text-align: left; }
.user .bubble { background: #2e2e2e; }
.assistant .bubble { background: #b9d3a8; color: #1f2937; }
.plain { white-space: pre-wrap; }
.error { background: #fee2e2; border: 1px solid #f87171; color: #b91c1c; padding: .75rem 1rem; border-radius: .25rem; }
#loading { color: #9ca3af; }
form { display: flex; gap: .5rem; }
input[type=text] { flex: 1; padding: .5rem; border: 0; border-radius: .25rem; background: #2c2c2c; color: #fff; }
</style>
</head>
<body>
<header>
<select id="model">{{MODEL_OPTIONS}}</select>
<button id="clear" type="button">Clear Chat</button>
</header>
<main>
<div id="chat-container">
<div id="transcript">{{TRANSCRIPT}}</div>
<div id="loading"{{LOADING}}>&hellip;</div>
{{ERROR}}
</div>
<form id="composer">
<input id="input" type="text" placeholder="Ask something..." autocomplete="off"{{DISABLED}}>
<button id="send" type="submit"{{DISABLED}}>Send</button>
</form>
</main>
<script>
(() => {
  const container = document.getElementById("chat-container");
  const transcript = document.getElementById("transcript");
  const input = document.getElementById("input");
  const send = document.getElementById("send");
  const loading = document.getElementById("loading");
  const errorBox = document.getElementById("error");
  let lastCount = -1;

  const scrollIfGrown = () => {
    const count = transcript.children.length;
    if (count !== lastCount) {
      lastCount = count;
      container.scrollTop = container.scrollHeight;
    }
  };
  const setBusy = (busy) => {
    input.disabled = busy;
    send.disabled = busy || !input.value.trim();
    loading.hidden = !busy;
  };
  const showError = (message) => {
    errorBox.textContent = message || "";
    errorBox.hidden = !message;
  };
  const refresh = async () => {
    const res = await fetch("/api/transcript");
    transcript.innerHTML = await res.text();
    scrollIfGrown();
  };
  const bubble = (role, text) => {
    const outer = document.createElement("div");
    outer.className = "msg " + role;
    const inner = document.createElement("div");
    inner.className = "bubble plain";
    inner.textContent = text;
    outer.appendChild(inner);
    transcript.appendChild(outer);
    scrollIfGrown();
    return inner;
  };

  input.addEventListener("input", () => { send.disabled = input.disabled || !input.value.trim(); });
  send.disabled = input.disabled || !input.value.trim();

  document.getElementById("composer").addEventListener("submit", async (e) => {
    e.preventDefault();
    const content = input.value;
    if (!content.trim()) return;
    input.value = "";
    showError(null);
    setBusy(true);
    bubble("user", content);
    const answer = bubble("assistant", "");
    try {
      const res = await fetch("/api/chat", {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ content }),
      });
      if (!res.ok) {
        const body = await res.json().catch(() => ({}));
        showError("Error: " + (body.error || res.statusText));
        return;
      }
      const reader = res.body.getReader();
      const decoder = new TextDecoder();
      let buf = "";
      for (;;) {
        const { value, done } = await reader.read();
        if (done) break;
        buf += decoder.decode(value, { stream: true });
        let nl;
        while ((nl = buf.indexOf("\n")) >= 0) {
          const line = buf.slice(0, nl).trim();
          buf = buf.slice(nl + 1);
          if (!line) continue;
          const evt = JSON.parse(line);
          if (evt.type === "fragment") {
            answer.textContent += evt.content;
            container.scrollTop = container.scrollHeight;
          } else if (evt.type === "error") {
            showError(evt.message);
          }
        }
      }
    } catch (err) {
      showError("Error: " + (err.message || "Failed to get response from Ollama"));
    } finally {
      await refresh().catch(() => {});
      setBusy(false);
      input.focus();
    }
  });

  document.getElementById("clear").addEventListener("click", async () => {
    await fetch("/api/clear", { method: "POST" });
    showError(null);
    await refresh();
  });

  document.getElementById("model").addEventListener("change", async (e) => {
    await fetch("/api/model", {
      method: "PUT",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ model: e.target.value }),
    });
  });

  scrollIfGrown();
})();
</script>
</body>
</html>
"##;
