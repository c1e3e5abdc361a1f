use std::sync::Arc;

use clap::{Args, Subcommand};

use super::CliContext;
use plugin_platform::chat::{ChatMessage, PluginConversationStore, SqliteChatStorage, page_key};

#[derive(Args, Debug)]
pub struct ChatArgs {
    #[command(subcommand)]
    pub command: ChatCommands,
}

#[derive(Subcommand, Debug)]
pub enum ChatCommands {
    /// List every chat of a plugin
    List { plugin: String },

    /// Print one chat
    Show {
        plugin: String,
        #[arg(long)]
        page: Option<String>,
    },

    /// Append a user message
    Send {
        plugin: String,
        text: String,
        #[arg(long)]
        page: Option<String>,
    },

    /// Print the draft, or replace it when TEXT is given (empty clears)
    Draft {
        plugin: String,
        text: Option<String>,
        #[arg(long)]
        page: Option<String>,
    },
}

pub async fn execute(args: ChatArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = &context.config;
    tokio::fs::create_dir_all(&config.data_dir).await?;
    let storage = SqliteChatStorage::open(&config.chat_db())?;
    let store = PluginConversationStore::new(Arc::new(storage), config.chat.lru_capacity);

    match args.command {
        ChatCommands::List { plugin } => {
            for chat in store.list_for_plugin(&plugin).await? {
                println!("{:<60} {} message(s)", chat.page_key, chat.messages.len());
            }
        }
        ChatCommands::Show { plugin, page } => match store.get_chat(&plugin, &page_key(page.as_deref())).await? {
            Some(chat) => println!("{}", serde_json::to_string_pretty(&chat)?),
            None => println!("No chat yet."),
        },
        ChatCommands::Send { plugin, text, page } => {
            let page = page_key(page.as_deref());
            let chat = store.append_message(&plugin, &page, ChatMessage::user(text)).await?;
            store.clear_draft(&plugin, &page).await?;
            println!("{} message(s) in {}", chat.messages.len(), chat.chat_key);
        }
        ChatCommands::Draft { plugin, text, page } => {
            let page = page_key(page.as_deref());
            match text {
                Some(text) => store.save_draft(&plugin, &page, &text).await?,
                None => match store.get_draft(&plugin, &page).await? {
                    Some(draft) => println!("{}", draft.text),
                    None => println!("No draft."),
                },
            }
        }
    }
    Ok(())
}
