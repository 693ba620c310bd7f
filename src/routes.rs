// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header},
    middleware,
    routing::{delete, get, patch, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::{
    handlers::{comments, feed, hashtags, media, posts},
    state::AppState,
    utils::jwt::{auth_middleware, optional_auth_middleware},
};

/// Assembles the main application router.
///
/// * Read routes accept an optional bearer token; write routes require one.
/// * Applies global middleware (Trace, CORS).
/// * Injects global state.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let read_routes = Router::new()
        .route("/posts/{id}", get(posts::get_post))
        .route("/posts/{id}/comments", get(comments::list_comments))
        .route("/feed/home", get(feed::home_feed))
        .route("/feed/explore", get(feed::explore_feed))
        .route("/feed/hashtag/{tag}", get(feed::hashtag_feed))
        .route("/users/{id}/posts", get(feed::user_posts))
        .route("/hashtags/trending", get(hashtags::trending))
        .route("/hashtags/{tag}", get(hashtags::get_hashtag))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ));

    let upload_limit = state.config.storage.max_upload_bytes;
    let media_routes = Router::new()
        .route("/media", post(media::upload_media))
        .route("/media/{*path}", delete(media::delete_media))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(upload_limit));

    let write_routes = Router::new()
        .route("/posts", post(posts::create_post))
        .route(
            "/posts/{id}",
            patch(posts::update_post).delete(posts::delete_post),
        )
        .route("/posts/{id}/like", post(posts::like_post))
        .route("/posts/{id}/unlike", post(posts::unlike_post))
        .route("/posts/{id}/save", post(posts::save_post))
        .route("/posts/{id}/unsave", post(posts::unsave_post))
        .route("/posts/{id}/share", post(posts::share_post))
        .route("/posts/{id}/unshare", post(posts::unshare_post))
        .route("/posts/{id}/vote", post(posts::vote_poll))
        .route("/posts/{id}/comments", post(comments::create_comment))
        .route("/comments/{id}", delete(comments::delete_comment))
        .route("/comments/{id}/like", post(comments::like_comment))
        .route("/comments/{id}/unlike", post(comments::unlike_comment))
        .route("/feed/following", get(feed::following_feed))
        .route("/feed/saved", get(feed::saved_feed))
        .merge(media_routes)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/v1", read_routes.merge(write_routes))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
