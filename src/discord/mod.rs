use std::sync::Arc;

use serenity::{
    async_trait,
    model::gateway::{GatewayIntents, Ready},
    prelude::*,
};

use self::sweeper::Sweeper;

pub mod commands;
pub mod messages;
pub mod servers;
pub mod sweeper;

pub fn intents() -> GatewayIntents {
    let mut intents: GatewayIntents = GatewayIntents::empty();
    intents.insert(GatewayIntents::GUILDS);
    intents.insert(GatewayIntents::MESSAGE_CONTENT);
    intents.insert(GatewayIntents::GUILD_MESSAGES);
    intents.insert(GatewayIntents::GUILD_MESSAGE_REACTIONS);

    intents
}

pub struct Handler {
    pub sweeper: Arc<Sweeper>,
}

#[async_trait]
impl EventHandler for Handler {
    // the sweeper waits for the gateway, reconnects fire `ready` again
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
        self.sweeper.clone().start(ctx);
    }
}
