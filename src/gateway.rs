//! Discord gateway: the serenity event handler and interaction plumbing.
//!
//! Everything here translates between Discord types and the plain functions
//! in `crate::bot`, then sends whatever reply value comes back. No bot
//! behavior lives in this module.

use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use chrono::Utc;
use rusqlite::Connection;
use serenity::all::{
    Command, CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType,
    CreateAutocompleteResponse, CreateCommand, CreateCommandOption, CreateEmbed,
    CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    Interaction, Message, Reaction, Ready,
};
use serenity::async_trait;
use serenity::prelude::{Context, EventHandler, GatewayIntents};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bot::commands::{self, CommandReply};
use crate::bot::message_handler::{self, IncomingMessage};
use crate::bot::reaction_handler::{self, CAPTURE_EMOJI};
use crate::config::Config;
use crate::ocr;

/// Gateway intents the bot needs: messages with content, plus reactions
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
}

/// The shared event handler; owns the database handle and config
pub struct Bot {
    db: Arc<Mutex<Connection>>,
    config: Config,
    http: reqwest::Client,
}

impl Bot {
    pub fn new(db: Arc<Mutex<Connection>>, config: Config) -> Self {
        Self {
            db,
            config,
            http: reqwest::Client::new(),
        }
    }
}

fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("store")
            .description("Store a quote or thought to the Commonbase")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "content",
                    "The text to store",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Integer,
                    "book",
                    "The book this is from",
                )
                .set_autocomplete(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::String,
                "source",
                "Source URL",
            )),
        CreateCommand::new("cr")
            .description("Manage your currently reading list")
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "list",
                "Show your currently reading list",
            ))
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "add",
                    "Add a new book and start reading it",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "title", "Book title")
                        .required(true),
                )
                .add_sub_option(CreateCommandOption::new(
                    CommandOptionType::String,
                    "author",
                    "Book author",
                ))
                .add_sub_option(CreateCommandOption::new(
                    CommandOptionType::String,
                    "image",
                    "Cover image URL",
                )),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "existing",
                    "Start reading a book already in the database",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::Integer, "book", "The book")
                        .required(true)
                        .set_autocomplete(true),
                ),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "finished",
                    "Mark a book you are reading as finished",
                )
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::Integer, "book", "The book")
                        .required(true)
                        .set_autocomplete(true),
                ),
            ),
        CreateCommand::new("ocr")
            .description("Extract text from an image and store it")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::Attachment,
                    "image",
                    "Image to extract text from",
                )
                .required(true),
            ),
        CreateCommand::new("bookshelf").description("Link to the club bookshelf"),
        CreateCommand::new("graph").description("Link to the Commonbase knowledge graph"),
    ]
}

fn str_option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_str())
}

fn int_option(options: &[CommandDataOption], name: &str) -> Option<i64> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| o.value.as_i64())
}

/// Peel off the subcommand layer of a `/cr`-style command
fn subcommand(options: &[CommandDataOption]) -> Option<(&str, &[CommandDataOption])> {
    options.first().and_then(|o| match &o.value {
        CommandDataOptionValue::SubCommand(inner) => Some((o.name.as_str(), inner.as_slice())),
        _ => None,
    })
}

fn embed_from(embed: commands::Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new()
        .title(embed.title)
        .description(embed.description)
        .color(embed.color);
    for (name, value) in embed.fields {
        builder = builder.field(name, value, true);
    }
    builder
}

async fn send_reply(ctx: &Context, cmd: &CommandInteraction, reply: CommandReply) -> Result<()> {
    let message = match reply {
        CommandReply::Text(text) => CreateInteractionResponseMessage::new().content(text),
        CommandReply::Ephemeral(text) => CreateInteractionResponseMessage::new()
            .content(text)
            .ephemeral(true),
        CommandReply::Embed(embed) => {
            CreateInteractionResponseMessage::new().embed(embed_from(embed))
        }
    };

    cmd.create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await
        .context("Failed to send interaction response")?;
    Ok(())
}

const OCR_FAILURE_REPLY: &str =
    "Sorry, something went wrong processing that image. Please try again.";
const COMMAND_FAILURE_REPLY: &str = "Sorry, something went wrong handling that command.";

/// Text placed in the deferred `/ocr` reply. A failed download or storage
/// error still produces a user-visible message rather than leaving the
/// interaction stuck on its "thinking" placeholder.
fn ocr_edit_content(outcome: Result<String>) -> String {
    match outcome {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "OCR command failed");
            OCR_FAILURE_REPLY.to_string()
        }
    }
}

impl Bot {
    async fn dispatch_command(&self, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
        let discord_id = cmd.user.id.to_string();
        let username = cmd.user.name.clone();
        let channel_id = cmd.channel_id.to_string();
        let now = Utc::now();

        match cmd.data.name.as_str() {
            "store" => {
                let content = str_option(&cmd.data.options, "content").unwrap_or_default();
                let book_id = int_option(&cmd.data.options, "book");
                let source_url = str_option(&cmd.data.options, "source");
                let reply = {
                    let conn = self.db.lock().await;
                    commands::store(
                        &conn,
                        &discord_id,
                        &username,
                        &channel_id,
                        &cmd.id.to_string(),
                        content,
                        book_id,
                        source_url,
                        now,
                    )?
                };
                send_reply(ctx, cmd, reply).await
            }
            "cr" => {
                let reply = match subcommand(&cmd.data.options) {
                    Some(("list", _)) => {
                        let conn = self.db.lock().await;
                        commands::cr_list(&conn, &discord_id, &username)?
                    }
                    Some(("add", opts)) => {
                        let title = str_option(opts, "title").unwrap_or_default();
                        let author = str_option(opts, "author");
                        let image = str_option(opts, "image");
                        let conn = self.db.lock().await;
                        commands::cr_add(&conn, &discord_id, &username, title, author, image, now)?
                    }
                    Some(("existing", opts)) => {
                        let book_id = int_option(opts, "book").unwrap_or(0);
                        let conn = self.db.lock().await;
                        commands::cr_existing(&conn, &discord_id, &username, book_id, now)?
                    }
                    Some(("finished", opts)) => {
                        let user_book_id = int_option(opts, "book").unwrap_or(0);
                        let conn = self.db.lock().await;
                        commands::cr_finished(&conn, &discord_id, &username, user_book_id, now)?
                    }
                    _ => CommandReply::Ephemeral("Unknown subcommand.".to_string()),
                };
                send_reply(ctx, cmd, reply).await
            }
            "ocr" => self.handle_ocr_command(ctx, cmd).await,
            "bookshelf" => {
                let reply = {
                    let conn = self.db.lock().await;
                    commands::bookshelf(&conn, &self.config.bookshelf_url)?
                };
                send_reply(ctx, cmd, reply).await
            }
            "graph" => {
                let reply = {
                    let conn = self.db.lock().await;
                    commands::graph(&conn, &discord_id, &username, &self.config.graph_url)?
                };
                send_reply(ctx, cmd, reply).await
            }
            other => {
                warn!(command = %other, "Received unknown command");
                Ok(())
            }
        }
    }

    /// `/ocr` has to download and run Tesseract, so it defers first and edits
    /// the response when the work finishes. Once the defer has acknowledged
    /// the interaction, Discord rejects any fresh response; every outcome
    /// after that point, failures included, must go through `edit_response`.
    async fn handle_ocr_command(&self, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
        cmd.defer(&ctx.http)
            .await
            .context("Failed to defer OCR interaction")?;

        let content = ocr_edit_content(self.run_ocr(cmd).await);
        cmd.edit_response(&ctx.http, EditInteractionResponse::new().content(content))
            .await
            .context("Failed to edit OCR response")?;
        Ok(())
    }

    /// The fallible part of `/ocr`: resolve the attachment, download, extract,
    /// open the selection flow. Returns the user-facing text for the edited
    /// reply; validation misses are replies, not errors.
    async fn run_ocr(&self, cmd: &CommandInteraction) -> Result<String> {
        let attachment = cmd.data.options.iter().find_map(|o| match &o.value {
            CommandDataOptionValue::Attachment(id) => cmd.data.resolved.attachments.get(id),
            _ => None,
        });

        let attachment = match attachment {
            Some(attachment) if attachment.size as usize <= ocr::MAX_IMAGE_BYTES => attachment,
            Some(_) => return Ok("That image is too large (10MB limit).".to_string()),
            None => return Ok("Please attach an image.".to_string()),
        };

        let bytes = self
            .http
            .get(&attachment.url)
            .send()
            .await
            .context("Failed to download attachment")?
            .bytes()
            .await
            .context("Failed to read attachment body")?;

        let text = match ocr::extract_text(&bytes).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "OCR extraction failed");
                return Ok(
                    "Could not read that image. Please attach a PNG, JPEG, BMP or TIFF."
                        .to_string(),
                );
            }
        };

        let reply = {
            let conn = self.db.lock().await;
            commands::begin_ocr_selection(
                &conn,
                &cmd.user.id.to_string(),
                &cmd.user.name,
                &cmd.channel_id.to_string(),
                &text,
                Utc::now(),
            )?
        };

        match reply {
            CommandReply::Text(text) | CommandReply::Ephemeral(text) => Ok(text),
            CommandReply::Embed(_) => unreachable!("OCR flow replies with text"),
        }
    }

    async fn dispatch_autocomplete(&self, ctx: &Context, cmd: &CommandInteraction) -> Result<()> {
        let partial = cmd
            .data
            .autocomplete()
            .map(|focused| focused.value.to_string())
            .unwrap_or_default();

        let choices = {
            let conn = self.db.lock().await;
            match (cmd.data.name.as_str(), subcommand(&cmd.data.options)) {
                ("store", _) => commands::autocomplete_books(&conn, &partial)?,
                ("cr", Some(("existing", _))) => commands::autocomplete_books(&conn, &partial)?,
                ("cr", Some(("finished", _))) => commands::autocomplete_currently_reading(
                    &conn,
                    &cmd.user.id.to_string(),
                    &partial,
                )?,
                _ => Vec::new(),
            }
        };

        let mut response = CreateAutocompleteResponse::new();
        for (label, id) in choices {
            response = response.add_int_choice(label, id);
        }

        cmd.create_response(&ctx.http, CreateInteractionResponse::Autocomplete(response))
            .await
            .context("Failed to send autocomplete response")?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for Bot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(bot = %ready.user.name, "Connected to Discord");

        if let Err(e) = Command::set_global_commands(&ctx.http, command_definitions()).await {
            error!(error = %e, "Failed to register slash commands");
        } else {
            info!("Slash commands registered");
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let incoming = IncomingMessage {
            id: msg.id.to_string(),
            channel_id: msg.channel_id.to_string(),
            author_id: msg.author.id.to_string(),
            author_name: msg.author.name.clone(),
            content: msg.content.clone(),
        };

        let result = {
            let conn = self.db.lock().await;
            message_handler::handle_message(&conn, &self.config.bookshelf_url, &incoming, Utc::now())
        };

        match result {
            Ok(Some(reply)) => {
                if let Err(e) = msg.reply(&ctx.http, reply).await {
                    error!(error = %e, "Failed to send message reply");
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Message handler failed"),
        }
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        if !reaction.emoji.unicode_eq(CAPTURE_EMOJI) {
            return;
        }

        let reactor = match reaction.user(&ctx.http).await {
            Ok(user) if !user.bot => user,
            Ok(_) => return,
            Err(e) => {
                error!(error = %e, "Failed to resolve reacting user");
                return;
            }
        };

        let message = match reaction.message(&ctx.http).await {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Failed to fetch reacted message");
                return;
            }
        };

        let result = {
            let conn = self.db.lock().await;
            reaction_handler::handle_plus_reaction(
                &conn,
                &reactor.id.to_string(),
                &reactor.name,
                &message.id.to_string(),
                &message.channel_id.to_string(),
                &message.content,
            )
        };

        match result {
            Ok(Some(reply)) => {
                if let Err(e) = reaction.channel_id.say(&ctx.http, reply).await {
                    error!(error = %e, "Failed to send reaction reply");
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Reaction handler failed"),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(cmd) => {
                if let Err(e) = self.dispatch_command(&ctx, &cmd).await {
                    error!(command = %cmd.data.name, error = %e, "Command handler failed");
                    let apology = CreateInteractionResponseMessage::new()
                        .content(COMMAND_FAILURE_REPLY)
                        .ephemeral(true);
                    if cmd
                        .create_response(&ctx.http, CreateInteractionResponse::Message(apology))
                        .await
                        .is_err()
                    {
                        // Already acknowledged (deferred); edit the
                        // placeholder instead of creating a fresh response
                        let _ = cmd
                            .edit_response(
                                &ctx.http,
                                EditInteractionResponse::new().content(COMMAND_FAILURE_REPLY),
                            )
                            .await;
                    }
                }
            }
            Interaction::Autocomplete(cmd) => {
                if let Err(e) = self.dispatch_autocomplete(&ctx, &cmd).await {
                    error!(command = %cmd.data.name, error = %e, "Autocomplete failed");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_ocr_edit_content_passes_reply_text_through() {
        assert_eq!(ocr_edit_content(Ok("extracted".to_string())), "extracted");
    }

    #[test]
    fn test_ocr_edit_content_maps_failures_to_visible_reply() {
        // A failed download must still end in a user-visible edited reply
        let content = ocr_edit_content(Err(anyhow!("download failed")));
        assert_eq!(content, OCR_FAILURE_REPLY);
    }
}
