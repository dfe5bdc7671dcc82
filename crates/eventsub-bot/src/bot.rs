//! Runtime wiring.
//!
//! Startup resolves the bot and channel ids, builds the subscription registry
//! and starts the session. Events are then handled strictly one at a time, in
//! arrival order, until shutdown or a fatal error.

use std::{future::Future, sync::Arc};

use eventsub_transport::{
    TransportError,
    auth::HelixAuth,
    helix::{EventSubApi, HelixClient, HelixConfig},
    reconnect::ReconnectPolicy,
    websocket::{Event, Session, SessionConfig, SessionHandle, SessionStream, SubscriptionRegistry},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    channels::ChannelDirectory,
    commands::CommandProcessor,
    config::{ConfigError, Settings},
    dispatcher::{self, ChatMessage},
    lights::{LightsClient, LightsError},
    outbound::Outbound,
    prize::{PrizeError, WordListGenerator},
};

#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Lights client: {0}")]
    Lights(#[from] LightsError),

    #[error(transparent)]
    Prize(#[from] PrizeError),

    #[error("Session failed: {0}")]
    Session(String),

    #[error("Session ended unexpectedly")]
    SessionEnded,
}

/// Ids resolved once at startup.
#[derive(Clone, Debug)]
pub struct Identity {
    pub bot_user_id: String,
    pub channels: ChannelDirectory,
}

impl Identity {
    /// Look up the bot and every configured channel. Any failure is fatal.
    pub async fn resolve<A>(api: &A, bot_login: &str, logins: &[String]) -> Result<Self, BotError>
    where
        A: EventSubApi + ?Sized,
    {
        let bot_user_id = api.lookup_user_id(bot_login).await?;
        let ids = api.lookup_user_ids(logins).await?;
        let channels = ChannelDirectory::from_lookup(logins, &ids);

        info!(bot = %bot_login, id = %bot_user_id, "Bot resolved");
        for channel in channels.iter() {
            info!(login = %channel.login, id = %channel.broadcaster_id, "Channel");
        }
        Ok(Self {
            bot_user_id,
            channels,
        })
    }

    /// One chat subscription per channel, read as the bot.
    pub fn registry(&self) -> SubscriptionRegistry {
        SubscriptionRegistry::for_chat_channels(self.channels.broadcaster_ids(), &self.bot_user_id)
    }
}

/// Handles session events.
pub struct Bot<A: ?Sized> {
    channels: ChannelDirectory,
    commands: CommandProcessor,
    outbound: Outbound<A>,
}

impl<A> Bot<A>
where
    A: EventSubApi + ?Sized,
{
    pub fn new(channels: ChannelDirectory, commands: CommandProcessor, outbound: Outbound<A>) -> Self {
        Self {
            channels,
            commands,
            outbound,
        }
    }

    /// Handle one event. Errors are fatal.
    pub async fn handle_event(&mut self, event: Event) -> Result<(), BotError> {
        match event {
            Event::Connected {
                epoch,
                session_id,
                subscriptions,
            } => {
                info!(
                    epoch = epoch.0,
                    %session_id,
                    created = subscriptions.created,
                    rejected = subscriptions.rejected,
                    "Connected"
                );
                Ok(())
            }
            Event::Disconnected { epoch, reason } => {
                warn!(epoch = epoch.0, %reason, "Disconnected, reconnecting");
                Ok(())
            }
            Event::Notification(notification) => match dispatcher::dispatch(&notification) {
                Some(message) => Ok(self.handle_chat(message).await?),
                None => Ok(()),
            },
            Event::Revocation(subscription) => {
                warn!(
                    kind = %subscription.kind,
                    condition = ?subscription.condition,
                    "Subscription revoked"
                );
                Ok(())
            }
            Event::Fatal { reason } => Err(BotError::Session(reason)),
        }
    }

    async fn handle_chat(&mut self, message: ChatMessage) -> Result<(), TransportError> {
        let chatter = message.chatter.as_deref();
        info!(
            "[{}] <{}> {}",
            self.channels.display_name(&message.broadcaster_id),
            chatter.unwrap_or("?"),
            message.text
        );

        let Some(reply) = self.commands.handle(&message.text, chatter).await else {
            return Ok(());
        };
        self.outbound
            .send(
                &message.broadcaster_id,
                &reply,
                message.message_id.as_deref(),
            )
            .await
    }
}

/// Handle events until `shutdown` resolves or a fatal error occurs, then
/// close the session.
///
/// Shutdown also cancels a reply that is still waiting to be sent.
pub async fn drive<A, F>(
    mut bot: Bot<A>,
    handle: SessionHandle,
    mut events: SessionStream,
    shutdown: F,
) -> Result<(), BotError>
where
    A: EventSubApi + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let result = loop {
        let event = tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(()),
            event = events.next() => event,
        };
        let Some(event) = event else {
            break Err(BotError::SessionEnded);
        };

        let handled = tokio::select! {
            biased;
            _ = &mut shutdown => break Ok(()),
            handled = bot.handle_event(event) => handled,
        };
        if let Err(err) = handled {
            break Err(err);
        }
    };

    info!("Closing session");
    drop(events);
    if handle.close().await.is_err() {
        warn!("Session task already stopped");
    }
    handle.closed().await;
    result
}

/// Start a session for `identity` and drive `bot` with it.
pub async fn run_with<A, P, F>(
    api: Arc<A>,
    identity: &Identity,
    bot: Bot<A>,
    session: SessionConfig,
    policy: P,
    shutdown: F,
) -> Result<(), BotError>
where
    A: EventSubApi + ?Sized,
    P: ReconnectPolicy,
    F: Future<Output = ()>,
{
    let registry = identity.registry();
    info!(subscriptions = registry.len(), url = %session.url, "Starting session");
    let (handle, events) = Session::start(session, api, registry, policy)?;
    drive(bot, handle, events, shutdown).await
}

/// Run the bot against the real services.
pub async fn run<F>(settings: &Settings, shutdown: F) -> Result<(), BotError>
where
    F: Future<Output = ()>,
{
    let api = Arc::new(HelixClient::new(
        HelixConfig::new(&settings.helix_base),
        HelixAuth::new(&settings.client_id, &settings.access_token),
    )?);
    let prizes = Arc::new(WordListGenerator::from_path(&settings.prize_words)?);
    let lights = Arc::new(LightsClient::new(&settings.lights_api_base)?);

    let identity =
        Identity::resolve(api.as_ref(), &settings.bot_login, &settings.broadcaster_logins).await?;

    let commands = CommandProcessor::new(lights, prizes).lights_cooldown(settings.lights_cooldown);
    let outbound = Outbound::new(
        Arc::clone(&api),
        &identity.bot_user_id,
        settings.min_send_interval,
    );
    let bot = Bot::new(identity.channels.clone(), commands, outbound);

    run_with(
        api,
        &identity,
        bot,
        settings.session_config(),
        settings.reconnect_policy(),
        shutdown,
    )
    .await
}
