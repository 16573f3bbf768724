//! IMAP + SMTP mailbox implementation.
//!
//! Raw IMAP over rustls for fetch/search/effect operations, lettre for
//! SMTP sends. All IMAP work is blocking and runs in `spawn_blocking`;
//! each operation opens a fresh session.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc as StdArc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{HeaderValue, MessageParser};
use tracing::{debug, info};

use crate::config::MailboxConfig;
use crate::error::TransportError;
use crate::pipeline::types::MailMessage;
use crate::transport::Mailbox;

/// Max results returned by a subject search.
const SUBJECT_SEARCH_LIMIT: usize = 20;

/// IMAP/SMTP-backed mailbox.
pub struct ImapMailbox {
    config: MailboxConfig,
    folder: String,
}

impl ImapMailbox {
    pub fn new(config: MailboxConfig, folder: String) -> Self {
        Self { config, folder }
    }

    /// Fetch up to `limit` unread messages and mark them seen.
    pub async fn fetch_unread(&self, limit: usize) -> Result<Vec<MailMessage>, TransportError> {
        let config = self.config.clone();
        let folder = self.folder.clone();
        run_blocking(move || {
            let mut session = ImapSession::connect(&config)?;
            session.login(&config)?;
            session.select(&folder)?;

            let ids = session.search("UNSEEN")?;
            let mut messages = Vec::new();
            for id in ids.iter().take(limit) {
                if let Some(message) = session.fetch_message(id)? {
                    messages.push(message);
                }
                // Processed or not, never pick it up twice.
                let _ = session.command(&format!("STORE {id} +FLAGS (\\Seen)"));
            }
            session.logout();

            info!(count = messages.len(), unread = ids.len(), "Fetched unread messages");
            Ok(messages)
        })
        .await
    }

    fn build_message(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
        references: &[String],
    ) -> Result<Message, TransportError> {
        let mut builder = Message::builder()
            .from(self.config.from_address.parse().map_err(|e| {
                TransportError::InvalidAddress(format!("{}: {e}", self.config.from_address))
            })?)
            .to(to_address
                .parse()
                .map_err(|e| TransportError::InvalidAddress(format!("{to_address}: {e}")))?)
            .subject(subject);

        if let Some(parent) = in_reply_to {
            builder = builder.in_reply_to(bracketed(parent));

            // The reply's References chain is the parent's chain plus the
            // parent itself.
            let mut chain: Vec<String> = references.iter().map(|r| bracketed(r)).collect();
            chain.push(bracketed(parent));
            builder = builder.references(chain.join(" "));
        }

        builder
            .body(body.to_string())
            .map_err(|e| TransportError::Send(format!("failed to build message: {e}")))
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<MailMessage>, TransportError> {
        let config = self.config.clone();
        let folder = self.folder.clone();
        let target = normalize_message_id(message_id);
        run_blocking(move || {
            let mut session = ImapSession::connect(&config)?;
            session.login(&config)?;
            session.select(&folder)?;

            // Servers disagree on whether the header is indexed with or
            // without angle brackets; try both.
            let mut ids = session.search(&format!(
                "HEADER Message-ID \"{}\"",
                escape_quoted(&format!("<{target}>"))
            ))?;
            if ids.is_empty() {
                ids = session.search(&format!(
                    "HEADER Message-ID \"{}\"",
                    escape_quoted(&target)
                ))?;
            }

            let message = match ids.first() {
                Some(id) => session.fetch_message(id)?,
                None => None,
            };
            session.logout();
            Ok(message)
        })
        .await
    }

    async fn search_by_subject(
        &self,
        subject: &str,
    ) -> Result<Vec<MailMessage>, TransportError> {
        let config = self.config.clone();
        let folder = self.folder.clone();
        let subject = subject.to_string();
        run_blocking(move || {
            let mut session = ImapSession::connect(&config)?;
            session.login(&config)?;
            session.select(&folder)?;

            let ids = session.search(&format!("SUBJECT \"{}\"", escape_quoted(&subject)))?;
            let mut messages = Vec::new();
            for id in ids.iter().take(SUBJECT_SEARCH_LIMIT) {
                if let Some(message) = session.fetch_message(id)? {
                    messages.push(message);
                }
            }
            session.logout();
            Ok(messages)
        })
        .await
    }

    async fn send_reply(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
        references: &[String],
    ) -> Result<(), TransportError> {
        let email = self.build_message(to_address, subject, body, in_reply_to, references)?;
        let config = self.config.clone();
        let to = to_address.to_string();
        run_blocking(move || {
            let transport = SmtpTransport::relay(&config.smtp_host)
                .map_err(|e| TransportError::Connection {
                    host: config.smtp_host.clone(),
                    reason: format!("SMTP relay error: {e}"),
                })?
                .port(config.smtp_port)
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
                .build();

            transport
                .send(&email)
                .map_err(|e| TransportError::Send(e.to_string()))?;
            info!(to = %to, "Email sent");
            Ok(())
        })
        .await
    }

    async fn save_draft(
        &self,
        to_address: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
        references: &[String],
    ) -> Result<(), TransportError> {
        let email = self.build_message(to_address, subject, body, in_reply_to, references)?;
        let raw = email.formatted();
        let config = self.config.clone();
        run_blocking(move || {
            let mut session = ImapSession::connect(&config)?;
            session.login(&config)?;
            session.append(&config.drafts_folder, "(\\Draft)", &raw)?;
            session.logout();
            debug!(folder = %config.drafts_folder, "Draft saved");
            Ok(())
        })
        .await
    }

    async fn archive(&self, id: &str) -> Result<(), TransportError> {
        let config = self.config.clone();
        let folder = self.folder.clone();
        let id = id.to_string();
        run_blocking(move || {
            let mut session = ImapSession::connect(&config)?;
            session.login(&config)?;
            session.select(&folder)?;
            session.command_checked(&format!(
                "COPY {id} \"{}\"",
                escape_quoted(&config.archive_folder)
            ))?;
            session.command_checked(&format!("STORE {id} +FLAGS (\\Deleted)"))?;
            session.command_checked("EXPUNGE")?;
            session.logout();
            Ok(())
        })
        .await
    }

    async fn flag(&self, id: &str) -> Result<(), TransportError> {
        let config = self.config.clone();
        let folder = self.folder.clone();
        let id = id.to_string();
        run_blocking(move || {
            let mut session = ImapSession::connect(&config)?;
            session.login(&config)?;
            session.select(&folder)?;
            session.command_checked(&format!("STORE {id} +FLAGS (\\Flagged)"))?;
            session.logout();
            Ok(())
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::Imap(format!("blocking task failed: {e}")))?
}

// ── IMAP session ────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A single blocking IMAP-over-TLS session.
struct ImapSession {
    tls: TlsStream,
    tag: u32,
}

impl ImapSession {
    fn connect(config: &MailboxConfig) -> Result<Self, TransportError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port)).map_err(|e| {
            TransportError::Connection {
                host: config.imap_host.clone(),
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = StdArc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls::pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self { tls, tag: 0 };
        let _greeting = session.read_line()?;
        Ok(session)
    }

    fn login(&mut self, config: &MailboxConfig) -> Result<(), TransportError> {
        let response = self.command(&format!(
            "LOGIN \"{}\" \"{}\"",
            escape_quoted(&config.username),
            escape_quoted(&config.password)
        ))?;
        if !response.last().is_some_and(|l| l.contains("OK")) {
            return Err(TransportError::AuthFailed {
                user: config.username.clone(),
            });
        }
        Ok(())
    }

    fn select(&mut self, folder: &str) -> Result<(), TransportError> {
        self.command_checked(&format!("SELECT \"{}\"", escape_quoted(folder)))
            .map(|_| ())
    }

    /// Run a SEARCH and return the matching sequence numbers.
    fn search(&mut self, query: &str) -> Result<Vec<String>, TransportError> {
        let response = self.command(&format!("SEARCH {query}"))?;
        let mut ids = Vec::new();
        for line in &response {
            if let Some(rest) = line.strip_prefix("* SEARCH") {
                ids.extend(rest.split_whitespace().map(String::from));
            }
        }
        Ok(ids)
    }

    /// FETCH one message by sequence number and parse it.
    fn fetch_message(&mut self, id: &str) -> Result<Option<MailMessage>, TransportError> {
        let response = self.command(&format!("FETCH {id} RFC822"))?;
        let raw = fetch_literal(&response);
        Ok(parse_message(id, raw.as_bytes()))
    }

    /// APPEND a literal to a folder.
    fn append(&mut self, folder: &str, flags: &str, raw: &[u8]) -> Result<(), TransportError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let cmd = format!(
            "{tag} APPEND \"{}\" {flags} {{{}}}\r\n",
            escape_quoted(folder),
            raw.len()
        );
        self.tls.write_all(cmd.as_bytes())?;
        self.tls.flush()?;

        let line = self.read_line()?;
        if !line.starts_with('+') {
            return Err(TransportError::Imap(format!(
                "APPEND not accepted: {}",
                line.trim_end()
            )));
        }

        self.tls.write_all(raw)?;
        self.tls.write_all(b"\r\n")?;
        self.tls.flush()?;

        loop {
            let line = self.read_line()?;
            if line.starts_with(&tag) {
                if line.contains("OK") {
                    return Ok(());
                }
                return Err(TransportError::Imap(format!(
                    "APPEND failed: {}",
                    line.trim_end()
                )));
            }
        }
    }

    /// Send a tagged command and collect lines until the tagged response.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, TransportError> {
        self.tag += 1;
        let tag = format!("A{}", self.tag);
        let full = format!("{tag} {cmd}\r\n");
        self.tls.write_all(full.as_bytes())?;
        self.tls.flush()?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Like `command`, but an untagged-OK-less final line is an error.
    fn command_checked(&mut self, cmd: &str) -> Result<Vec<String>, TransportError> {
        let response = self.command(cmd)?;
        if !response.last().is_some_and(|l| l.contains("OK")) {
            return Err(TransportError::Imap(format!(
                "{cmd} failed: {}",
                response.last().map(|l| l.trim_end()).unwrap_or("")
            )));
        }
        Ok(response)
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err(TransportError::Imap("connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

// ── Message parsing ─────────────────────────────────────────────────

/// Reassemble the RFC822 literal from a FETCH response: drop the untagged
/// `* n FETCH (...` opener, the closing `)` line, and the tagged OK.
fn fetch_literal(response: &[String]) -> String {
    response
        .iter()
        .skip(1)
        .take(response.len().saturating_sub(3))
        .cloned()
        .collect()
}

/// Parse a raw RFC822 message into the pipeline's message type.
fn parse_message(id: &str, raw: &[u8]) -> Option<MailMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let from_address = format_address(parsed.from().and_then(|a| a.first()));
    let to_address = format_address(parsed.to().and_then(|a| a.first()));
    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let body = extract_text(&parsed);

    let date = parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(
                        u32::from(d.hour),
                        u32::from(d.minute),
                        u32::from(d.second),
                    )
                })
        })
        .map(|naive| naive.and_utc())
        .unwrap_or_else(chrono::Utc::now);

    let message_id = parsed.message_id().map(normalize_message_id);
    let in_reply_to = header_id_list(parsed.in_reply_to()).into_iter().next();
    let references = parsed
        .header("References")
        .map(header_id_list)
        .unwrap_or_default();

    Some(MailMessage {
        id: id.to_string(),
        from_address,
        to_address,
        subject,
        body,
        date,
        message_id,
        in_reply_to,
        references,
        thread_context: Vec::new(),
    })
}

/// "Name <addr>" when a display name is present, the bare address otherwise.
fn format_address(addr: Option<&mail_parser::Addr>) -> String {
    match addr {
        Some(addr) => {
            let email = addr.address().unwrap_or_default();
            match addr.name() {
                Some(name) if !name.is_empty() => format!("{name} <{email}>"),
                _ => email.to_string(),
            }
        }
        None => "unknown".to_string(),
    }
}

/// Readable text from a parsed message, falling back to de-tagged HTML.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    "(no readable content)".to_string()
}

/// Strip HTML tags and normalize whitespace (basic).
fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Message ids from a header value, normalized without angle brackets.
fn header_id_list(value: &HeaderValue) -> Vec<String> {
    match value {
        HeaderValue::Text(text) => text
            .split_whitespace()
            .map(normalize_message_id)
            .filter(|s| !s.is_empty())
            .collect(),
        HeaderValue::TextList(list) => list
            .iter()
            .map(|t| normalize_message_id(t))
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Strip surrounding angle brackets and whitespace from a Message-ID.
pub fn normalize_message_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn bracketed(id: &str) -> String {
    format!("<{}>", normalize_message_id(id))
}

/// Escape a string for use in an IMAP quoted string.
fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_message_ids() {
        assert_eq!(normalize_message_id("<abc@example.com>"), "abc@example.com");
        assert_eq!(normalize_message_id("  abc@example.com "), "abc@example.com");
    }

    #[test]
    fn escapes_imap_quoted_strings() {
        assert_eq!(escape_quoted(r#"pa"ss\word"#), r#"pa\"ss\\word"#);
    }

    #[test]
    fn fetch_literal_drops_protocol_lines() {
        let response = vec![
            "* 17 FETCH (RFC822 {64}\r\n".to_string(),
            "Subject: Hello\r\n".to_string(),
            "\r\n".to_string(),
            "Just the body.\r\n".to_string(),
            ")\r\n".to_string(),
            "A3 OK FETCH completed\r\n".to_string(),
        ];

        let raw = fetch_literal(&response);
        assert_eq!(raw, "Subject: Hello\r\n\r\nJust the body.\r\n");

        let msg = parse_message("17", raw.as_bytes()).expect("should parse");
        assert!(!msg.body.contains(')'));
    }

    #[test]
    fn parses_threaded_message() {
        let raw = concat!(
            "From: Jane Doe <jane@client.example>\r\n",
            "To: agent@example.com\r\n",
            "Subject: Re: Project timeline\r\n",
            "Date: Mon, 2 Jun 2025 10:30:00 +0000\r\n",
            "Message-ID: <m3@client.example>\r\n",
            "In-Reply-To: <m2@example.com>\r\n",
            "References: <m1@client.example> <m2@example.com>\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Sounds good, let's proceed.\r\n",
        );

        let msg = parse_message("17", raw.as_bytes()).expect("should parse");
        assert_eq!(msg.id, "17");
        assert_eq!(msg.from_address, "Jane Doe <jane@client.example>");
        assert_eq!(msg.subject, "Re: Project timeline");
        assert_eq!(msg.message_id.as_deref(), Some("m3@client.example"));
        assert_eq!(msg.in_reply_to.as_deref(), Some("m2@example.com"));
        assert_eq!(
            msg.references,
            vec!["m1@client.example", "m2@example.com"]
        );
        assert!(msg.body.contains("proceed"));
    }

    #[test]
    fn parses_html_only_message() {
        let raw = concat!(
            "From: news@letter.example\r\n",
            "To: agent@example.com\r\n",
            "Subject: Weekly digest\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<html><body><p>Big   news</p> this <b>week</b></body></html>\r\n",
        );

        let msg = parse_message("3", raw.as_bytes()).expect("should parse");
        assert!(msg.body.contains("news"));
        assert!(!msg.body.contains("<b>"));
    }
}
