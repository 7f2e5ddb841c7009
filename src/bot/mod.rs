pub mod commands;
pub mod handlers;
pub mod interactions;
pub mod services;

use crate::attendance::{ActivityStats, AttendanceService, RateLimiter, UserLocks};
use crate::config::Config;
use crate::database::{self, RetryPolicy, models::GuildSettings, queries};
use crate::scheduler;
use anyhow::Result;
use poise::serenity_prelude as serenity;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Attendance buttons allowed per user within `BUTTON_WINDOW`.
const BUTTON_LIMIT: usize = 5;
const BUTTON_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Data {
    pub pool: SqlitePool,
    pub config: Config,
    pub attendance: Arc<AttendanceService>,
    pub button_limiter: Arc<RateLimiter>,
}

impl Data {
    pub async fn guild_settings(&self, guild_id: serenity::GuildId) -> crate::error::Result<Option<GuildSettings>> {
        queries::get_guild_settings(&self.pool, &guild_id.to_string()).await
    }
}

pub async fn create_bot(config: Config) -> Result<serenity::Client> {
    let pool = database::create_connection(&config.database_url, RetryPolicy::new(config.db_connect_retries)).await?;

    let intents = serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::GUILD_MEMBERS;

    let setup_config = config.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::attendance::checkin(),
                commands::attendance::checkout(),
                commands::attendance::panel(),
                commands::reports::report(),
                commands::reports::open_sessions(),
                commands::reports::daily_report(),
                commands::reports::absentees(),
                commands::admin::setup(),
                commands::admin::leave(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(handlers::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let attendance = Arc::new(AttendanceService::new(
                    pool.clone(),
                    UserLocks::new(),
                    Arc::new(services::DiscordRoles::new(ctx.http.clone())),
                    Arc::new(services::DiscordNotifier::new(ctx.http.clone())),
                    Arc::new(ActivityStats::default()),
                    setup_config.timezone_offset,
                    setup_config.check_in_points,
                ));
                let button_limiter = Arc::new(RateLimiter::new(BUTTON_LIMIT, BUTTON_WINDOW));

                scheduler::start(
                    &setup_config,
                    Arc::clone(&attendance),
                    Arc::clone(&button_limiter),
                    pool.clone(),
                );

                Ok(Data {
                    pool,
                    config: setup_config,
                    attendance,
                    button_limiter,
                })
            })
        })
        .build();

    let client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await?;

    Ok(client)
}
