use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    enrich::{EnricherRegistry, PollEnricher},
    error::AppError,
    feed::FeedAssembler,
    indexer::HashtagIndexer,
    repository::{CommentRepository, HashtagRepository, PostRepository},
    storage::ObjectStorage,
    store::Store,
    trending::TrendingScorer,
    writer::PostWriter,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub posts: PostRepository,
    pub comments: CommentRepository,
    pub hashtags: HashtagRepository,
    pub polls: Arc<PollEnricher>,
    pub writer: PostWriter,
    pub feeds: FeedAssembler,
    pub scorer: TrendingScorer,
    pub storage: ObjectStorage,
}

impl AppState {
    /// Wires every component over one shared store.
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, AppError> {
        let polls = Arc::new(PollEnricher::new(store.clone()));
        let enrichers = EnricherRegistry::standard(store.clone(), polls.clone());

        let posts = PostRepository::new(store.clone(), enrichers.clone());
        let comments = CommentRepository::new(store.clone(), posts.clone());
        let hashtags = HashtagRepository::new(store.clone());
        let indexer = HashtagIndexer::new(store.clone());
        let writer = PostWriter::new(
            store.clone(),
            posts.clone(),
            enrichers.clone(),
            indexer,
            config.posts.max_content_length,
        );
        let feeds = FeedAssembler::new(store.clone(), posts.clone(), hashtags.clone(), enrichers);
        let scorer = TrendingScorer::new(
            store.clone(),
            config.trending.decay_hours,
            config.trending.window_days,
        );
        let storage = ObjectStorage::new(&config.store, &config.storage)?;

        Ok(Self {
            config,
            store,
            posts,
            comments,
            hashtags,
            polls,
            writer,
            feeds,
            scorer,
            storage,
        })
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
