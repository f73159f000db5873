use anyhow::anyhow;
use chrono::{DateTime, Utc};
use handlebars::{handlebars_helper, Handlebars};
use lazy_static::lazy_static;
use lettre::{ClientSecurity, SmtpClient, SmtpTransport, Transport};
use lettre_email::EmailBuilder;
use log::{debug, trace};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::notifs::Notify;
use crate::{PipelineResult, StageResult};


lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"([a-zA-Z_\- 0-9]+ )?<?([a-z0-9_\-\.\+]+@[a-z0-9\.\-_]+)>?").unwrap();
}

// TODO: handle auth (ssl brrr)
#[derive(Deserialize, Serialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum SMTPAuth {
    None,
}

impl Default for SMTPAuth {
    fn default() -> Self {
        Self::None
    }
}

fn is_default<T: Default + PartialEq>(t: &T) -> bool {
    t == &T::default()
}

#[derive(Deserialize, Serialize, Debug)]
pub struct SMTPConfig {
    pub(crate) addr: String,
    pub(crate) port: u16,
    #[serde(default = "SMTPAuth::default", skip_serializing_if = "is_default")]
    pub(crate) auth: SMTPAuth,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct Mailer {
    pub(crate) from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) recipients: Option<Vec<String>>,
    pub(crate) server: SMTPConfig,
}

fn render_text(result: &PipelineResult) -> anyhow::Result<(String, String)> {
    let mut reg = Handlebars::new();
    handlebars_helper!(status: |stage_results: Vec<StageResult>| {
        match stage_results.iter().any(|r| !r.success) {
            true => "Failure",
            false => "Success",
        }
    });
    handlebars_helper!(duration: |start: DateTime<Utc>, end: DateTime<Utc>| {
        format!("{}", (end - start).num_seconds())
    });
    reg.register_helper("run_status", Box::new(status));
    reg.register_helper("duration", Box::new(duration));
    Ok((
        reg.render_template(
            include_str!("../../../resources/templates/notifs/mail.txt.hbs"),
            &json!(result),
        )?,
        reg.render_template(
            include_str!("../../../resources/templates/notifs/mail.html.hbs"),
            &json!(result),
        )?,
    ))
}

enum EmailAddress {
    Single(String),
    Complete(String, String),
}

fn to_addr(s: &str) -> anyhow::Result<EmailAddress> {
    let matches = EMAIL_REGEX.captures(s);
    if let Some(matches) = matches {
        let c1 = matches.get(1);
        let c2 = matches.get(2);
        if let (Some(name), Some(email)) = (c1, c2) {
            return Ok(EmailAddress::Complete(
                email.as_str().to_string(),
                name.as_str().trim().to_string(),
            ));
        } else if let Some(email) = c2 {
            return Ok(EmailAddress::Single(email.as_str().to_string()));
        }
    }
    Err(anyhow!("could not make sense of \"{}\" as an email addr", s))
}

impl Notify for Mailer {
    fn send(&self, result: &PipelineResult) -> anyhow::Result<()> {
        let author = &result.context.commit.author;
        let mut email = EmailBuilder::new();
        if author.email.is_empty() && self.recipients.is_none() {
            return Err(anyhow!("nobody to notify: no commit author, no recipients"));
        }
        if !author.email.is_empty() {
            email = email.to(author.to_addr());
        }
        let mut email = match to_addr(&self.from)? {
            EmailAddress::Single(s) => {
                trace!("mail from {}", s);
                email.from(s)
            }
            EmailAddress::Complete(e, n) => {
                trace!("mail from {:?}", (&e, &n));
                email.from((e, n))
            }
        };
        if let Some(reply_to) = &self.reply_to {
            email = match to_addr(reply_to)? {
                EmailAddress::Single(s) => email.reply_to(s),
                EmailAddress::Complete(e, n) => email.reply_to((e, n)),
            };
        }
        if let Some(recipients) = &self.recipients {
            for recipient in recipients {
                debug!("Adding {} to recipients", recipient);
                email = match to_addr(recipient)? {
                    EmailAddress::Single(s) => email.cc(s),
                    EmailAddress::Complete(e, n) => email.cc((e, n)),
                }
            }
        }
        let (txt, html) = render_text(result)?;
        let email = email
            .subject(format!(
                "deploy results for {}#{}: {}",
                result.context.repo_name,
                result.context.branch,
                match result.success() {
                    true => "Success!",
                    false => "Failure",
                }
            ))
            .text(txt)
            .html(html)
            .build()
            .map_err(|e| anyhow!("Error while building mail: {}", e))?;
        let mut mailer = SmtpTransport::new(SmtpClient::new(
            format!("{}:{}", self.server.addr, self.server.port),
            ClientSecurity::None,
        )?);
        let _ = mailer.send(email.into())?;
        Ok(())
    }
}
