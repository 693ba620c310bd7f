// tests/post_tests.rs

mod common;

use std::time::Duration;

use common::{rows_where, seed_user, test_app};
use serde_json::json;
use socialfeed::{
    error::AppError,
    models::{
        comment::{CreateCommentRequest, DELETED_SENTINEL},
        post::{CreatePostRequest, PostVariant, UpdatePostRequest, Visibility},
    },
    store::tables,
};
use uuid::Uuid;

fn request(body: serde_json::Value) -> CreatePostRequest {
    serde_json::from_value(body).expect("valid create payload")
}

#[tokio::test]
async fn text_post_links_hashtags_and_mentions() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let alice = seed_user(&app.store, "alice");

    let post = app
        .state
        .writer
        .create(
            author,
            &request(json!({ "variant": "text", "content": "Hello #world @alice" })),
            &app.cancel,
        )
        .await
        .unwrap();

    assert_eq!(app.store.rows(tables::POSTS).len(), 1);

    let hashtags = app.store.rows(tables::HASHTAGS);
    assert_eq!(hashtags.len(), 1);
    assert_eq!(hashtags[0]["tag"], "world");

    let links = rows_where(&app.store, tables::POST_HASHTAGS, "post_id", &post.id.to_string());
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["hashtag_id"], hashtags[0]["id"]);

    let mentions = app.store.rows(tables::POST_MENTIONS);
    assert_eq!(mentions.len(), 1);
    assert_eq!(mentions[0]["mentioned_user_id"], json!(alice));
}

#[tokio::test]
async fn unknown_mentions_and_plain_text_write_no_links() {
    let app = test_app();
    let author = seed_user(&app.store, "author");

    app.state
        .writer
        .create(
            author,
            &request(json!({ "variant": "text", "content": "just words, @nobody here" })),
            &app.cancel,
        )
        .await
        .unwrap();

    assert!(app.store.rows(tables::HASHTAGS).is_empty());
    assert!(app.store.rows(tables::POST_HASHTAGS).is_empty());
    assert!(app.store.rows(tables::POST_MENTIONS).is_empty());
}

#[tokio::test]
async fn existing_hashtags_are_reused() {
    let app = test_app();
    let author = seed_user(&app.store, "author");

    for content in ["first #Rust", "second #rust #tokio"] {
        app.state
            .writer
            .create(author, &request(json!({ "variant": "text", "content": content })), &app.cancel)
            .await
            .unwrap();
    }

    assert_eq!(app.store.rows(tables::HASHTAGS).len(), 2);
    assert_eq!(app.store.rows(tables::POST_HASHTAGS).len(), 3);
}

#[tokio::test]
async fn create_then_get_round_trips_author_fields() {
    let app = test_app();
    let author = seed_user(&app.store, "author");

    let created = app
        .state
        .writer
        .create(
            author,
            &request(json!({
                "variant": "image",
                "content": "sunset",
                "media_urls": ["https://cdn.example.com/a.jpg"],
                "media_types": ["image"],
                "visibility": "followers",
                "allows_sharing": false,
                "is_nsfw": true,
            })),
            &app.cancel,
        )
        .await
        .unwrap();

    let fetched = app.state.posts.get(created.id, Some(author), &app.cancel).await.unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.variant, PostVariant::Image);
    assert_eq!(fetched.content, "sunset");
    assert_eq!(fetched.media_urls, vec!["https://cdn.example.com/a.jpg"]);
    assert_eq!(fetched.media_types, vec!["image"]);
    assert_eq!(fetched.visibility, Visibility::Followers);
    assert!(!fetched.allows_sharing);
    assert!(fetched.is_nsfw);
    assert!(fetched.is_published);
    assert!(fetched.published_at.is_some());
    assert_eq!(fetched.likes_count, 0);
    assert_eq!(fetched.comments_count, 0);
    assert_eq!(fetched.saves_count, 0);
    assert_eq!(fetched.author.as_ref().map(|a| a.username.as_str()), Some("author"));
}

#[tokio::test]
async fn drafts_have_no_publish_time_until_published() {
    let app = test_app();
    let author = seed_user(&app.store, "author");

    let draft = app
        .state
        .writer
        .create(
            author,
            &request(json!({
                "variant": "text",
                "content": "wip",
                "is_published": false,
                "is_draft": true,
            })),
            &app.cancel,
        )
        .await
        .unwrap();
    assert!(draft.published_at.is_none());

    let other = Uuid::new_v4();
    let hidden = app.state.posts.get(draft.id, Some(other), &app.cancel).await;
    assert!(matches!(hidden, Err(AppError::NotFound(_))));

    let update = UpdatePostRequest {
        is_published: Some(true),
        is_draft: Some(false),
        ..Default::default()
    };
    let published = app
        .state
        .writer
        .update(draft.id, author, &update, &app.cancel)
        .await
        .unwrap();
    assert!(published.is_published);
    assert!(published.published_at.is_some());
    assert!(published.updated_at >= draft.updated_at);
}

#[tokio::test]
async fn validation_rejects_bad_payloads() {
    let app = test_app();
    let author = seed_user(&app.store, "author");

    let mismatched = request(json!({
        "variant": "image",
        "content": "x",
        "media_urls": ["https://cdn.example.com/a.jpg"],
        "media_types": [],
    }));
    let result = app.state.writer.create(author, &mismatched, &app.cancel).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let no_article = request(json!({ "variant": "article", "content": "x" }));
    let result = app.state.writer.create(author, &no_article, &app.cancel).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    assert!(app.store.rows(tables::POSTS).is_empty());
}

#[tokio::test]
async fn update_by_non_owner_is_unauthorized_and_content_change_reindexes() {
    let app = test_app();
    let author = seed_user(&app.store, "author");

    let post = app
        .state
        .writer
        .create(author, &request(json!({ "variant": "text", "content": "old #alpha" })), &app.cancel)
        .await
        .unwrap();

    let update = UpdatePostRequest {
        content: Some("new #beta".to_string()),
        ..Default::default()
    };
    let stranger = app.state.writer.update(post.id, Uuid::new_v4(), &update, &app.cancel).await;
    assert!(matches!(stranger, Err(AppError::Unauthorized(_))));

    let updated = app.state.writer.update(post.id, author, &update, &app.cancel).await.unwrap();
    assert_eq!(updated.content, "new #beta");

    let links = app.store.rows(tables::POST_HASHTAGS);
    assert_eq!(links.len(), 1);
    let beta = rows_where(&app.store, tables::HASHTAGS, "tag", "beta");
    assert_eq!(links[0]["hashtag_id"], beta[0]["id"]);
    // Hashtags outlive their posts.
    assert_eq!(rows_where(&app.store, tables::HASHTAGS, "tag", "alpha").len(), 1);
}

#[tokio::test]
async fn soft_delete_by_non_owner_leaves_post_untouched() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let post = app
        .state
        .writer
        .create(author, &request(json!({ "variant": "text", "content": "mine" })), &app.cancel)
        .await
        .unwrap();

    let result = app.state.posts.soft_delete(post.id, Uuid::new_v4(), &app.cancel).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
    let row = &app.store.rows(tables::POSTS)[0];
    assert!(row["deleted_at"].is_null());

    app.state.posts.soft_delete(post.id, author, &app.cancel).await.unwrap();
    let deleted_at = app.store.rows(tables::POSTS)[0]["deleted_at"].clone();
    assert!(!deleted_at.is_null());

    // Idempotent, and the first timestamp sticks.
    app.state.posts.soft_delete(post.id, author, &app.cancel).await.unwrap();
    assert_eq!(app.store.rows(tables::POSTS)[0]["deleted_at"], deleted_at);

    let gone = app.state.posts.get(post.id, Some(author), &app.cancel).await;
    assert!(matches!(gone, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn likes_are_idempotent() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let viewer = seed_user(&app.store, "viewer");
    let post = app
        .state
        .writer
        .create(author, &request(json!({ "variant": "text", "content": "like me" })), &app.cancel)
        .await
        .unwrap();

    app.state.posts.like(post.id, viewer, &app.cancel).await.unwrap();
    app.state.posts.like(post.id, viewer, &app.cancel).await.unwrap();
    assert_eq!(app.store.rows(tables::POST_LIKES).len(), 1);

    app.state.posts.unlike(post.id, viewer, &app.cancel).await.unwrap();
    assert!(app.store.rows(tables::POST_LIKES).is_empty());
    app.state.posts.unlike(post.id, viewer, &app.cancel).await.unwrap();

    app.state.posts.like(post.id, viewer, &app.cancel).await.unwrap();
    let likes = app.store.rows(tables::POST_LIKES);
    assert_eq!(likes.len(), 1);
    assert_eq!(likes[0]["user_id"], json!(viewer));
    assert_eq!(app.store.rows(tables::POSTS)[0]["likes_count"], 1);

    let fetched = app.state.posts.get(post.id, Some(viewer), &app.cancel).await.unwrap();
    assert!(fetched.is_liked);
    assert!(!fetched.is_saved);
}

#[tokio::test]
async fn saves_and_shares_are_idempotent() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let viewer = seed_user(&app.store, "viewer");
    let post = app
        .state
        .writer
        .create(author, &request(json!({ "variant": "text", "content": "keep" })), &app.cancel)
        .await
        .unwrap();

    for _ in 0..2 {
        app.state.posts.save(post.id, viewer, Some("later"), &app.cancel).await.unwrap();
        app.state.posts.share(post.id, viewer, None, &app.cancel).await.unwrap();
    }
    assert_eq!(app.store.rows(tables::SAVED_POSTS).len(), 1);
    assert_eq!(app.store.rows(tables::POST_SHARES).len(), 1);
    assert_eq!(app.store.rows(tables::SAVED_POSTS)[0]["collection_name"], "later");

    app.state.posts.unsave(post.id, viewer, &app.cancel).await.unwrap();
    app.state.posts.unshare(post.id, viewer, &app.cancel).await.unwrap();
    assert!(app.store.rows(tables::SAVED_POSTS).is_empty());
    assert!(app.store.rows(tables::POST_SHARES).is_empty());

    let row = &app.store.rows(tables::POSTS)[0];
    assert_eq!(row["saves_count"], 0);
    assert_eq!(row["shares_count"], 0);
}

#[tokio::test]
async fn article_slugs_get_suffixes_and_tags_load_on_single_reads() {
    let app = test_app();
    let author = seed_user(&app.store, "author");

    let body = |content_html: &str| {
        request(json!({
            "variant": "article",
            "content": "teaser",
            "article": {
                "title": "Intro to Rust",
                "content_html": content_html,
                "tags": ["Rust", "beginners", "rust"],
            },
        }))
    };

    let first = app
        .state
        .writer
        .create(author, &body("<p>hello</p><script>alert(1)</script>"), &app.cancel)
        .await
        .unwrap();
    let second = app
        .state
        .writer
        .create(author, &body(&format!("<p>{}</p>", vec!["word"; 450].join(" "))), &app.cancel)
        .await
        .unwrap();

    let first_article = first.article.expect("article attached on create");
    assert_eq!(first_article.slug, "intro-to-rust");
    let html = first_article.content_html.unwrap_or_default();
    assert!(!html.contains("script"));
    assert_eq!(first_article.read_time_minutes, 1);

    let second_article = second.article.expect("article attached on create");
    assert_eq!(second_article.slug, "intro-to-rust-2");
    assert_eq!(second_article.read_time_minutes, 2);

    let fetched = app.state.posts.get(first.id, None, &app.cancel).await.unwrap();
    let article = fetched.article.expect("article loaded");
    assert_eq!(article.tags, vec!["beginners", "rust"]);
}

#[tokio::test]
async fn poll_votes_follow_selection_rules() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let voter = seed_user(&app.store, "voter");

    let post = app
        .state
        .writer
        .create(
            author,
            &request(json!({
                "variant": "poll",
                "content": "settle this",
                "poll": { "question": "Tabs or spaces?", "options": ["tabs", "spaces"] },
            })),
            &app.cancel,
        )
        .await
        .unwrap();
    assert_eq!(post.poll.as_ref().map(|p| p.options.len()), Some(2));

    let out_of_range = app.state.polls.cast_vote(post.id, voter, &[2], &app.cancel).await;
    assert!(matches!(out_of_range, Err(AppError::Validation(_))));
    let too_many = app.state.polls.cast_vote(post.id, voter, &[0, 1], &app.cancel).await;
    assert!(matches!(too_many, Err(AppError::Validation(_))));

    let poll = app.state.polls.cast_vote(post.id, voter, &[1], &app.cancel).await.unwrap();
    assert_eq!(poll.selected_options, vec![1]);
    assert_eq!(poll.options[1].votes_count, 1);
    assert_eq!(poll.total_votes, 1);

    let again = app.state.polls.cast_vote(post.id, voter, &[1], &app.cancel).await.unwrap();
    assert_eq!(again.total_votes, 1);
    let changed = app.state.polls.cast_vote(post.id, voter, &[0], &app.cancel).await;
    assert!(matches!(changed, Err(AppError::Conflict(_))));

    let fetched = app.state.posts.get(post.id, Some(voter), &app.cancel).await.unwrap();
    assert_eq!(fetched.poll.map(|p| p.selected_options), Some(vec![1]));
}

#[tokio::test]
async fn concurrent_votes_are_all_counted() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let first = seed_user(&app.store, "first");
    let second = seed_user(&app.store, "second");

    let post = app
        .state
        .writer
        .create(
            author,
            &request(json!({
                "variant": "poll",
                "content": "race",
                "poll": { "question": "Now?", "options": ["yes", "no"] },
            })),
            &app.cancel,
        )
        .await
        .unwrap();

    // Both voters read the option counts before either write lands.
    app.store.set_latency(tables::POLL_VOTES, Duration::from_millis(100));
    let (a, b) = tokio::join!(
        app.state.polls.cast_vote(post.id, first, &[0], &app.cancel),
        app.state.polls.cast_vote(post.id, second, &[0], &app.cancel),
    );
    a.unwrap();
    b.unwrap();

    let options = app.store.rows(tables::POLL_OPTIONS);
    let yes = options.iter().find(|o| o["position"] == json!(0)).expect("option 0");
    assert_eq!(yes["votes_count"], json!(2));
    assert_eq!(app.store.rows(tables::POLL_VOTES).len(), 2);
}

#[tokio::test]
async fn votes_on_deleted_or_hidden_posts_are_refused() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let voter = seed_user(&app.store, "voter");
    let poll = json!({ "question": "Which?", "options": ["a", "b"] });

    let deleted = app
        .state
        .writer
        .create(
            author,
            &request(json!({ "variant": "poll", "content": "gone", "poll": poll.clone() })),
            &app.cancel,
        )
        .await
        .unwrap();
    app.state.posts.soft_delete(deleted.id, author, &app.cancel).await.unwrap();
    let result = app.state.polls.cast_vote(deleted.id, voter, &[0], &app.cancel).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let draft = app
        .state
        .writer
        .create(
            author,
            &request(json!({
                "variant": "poll",
                "content": "wip",
                "is_published": false,
                "is_draft": true,
                "poll": poll.clone(),
            })),
            &app.cancel,
        )
        .await
        .unwrap();
    let result = app.state.polls.cast_vote(draft.id, voter, &[0], &app.cancel).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    assert!(app.store.rows(tables::POLL_VOTES).is_empty());
    assert!(app
        .store
        .rows(tables::POLL_OPTIONS)
        .iter()
        .all(|o| o["votes_count"] == json!(0)));
}

#[tokio::test]
async fn followers_only_posts_need_a_follow_edge() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let follower = seed_user(&app.store, "follower");
    let stranger = seed_user(&app.store, "stranger");
    app.store.seed(
        tables::FOLLOWS,
        vec![json!({ "follower_id": follower, "following_id": author })],
    );

    let post = app
        .state
        .writer
        .create(
            author,
            &request(json!({
                "variant": "text",
                "content": "inner circle",
                "visibility": "followers",
            })),
            &app.cancel,
        )
        .await
        .unwrap();

    for viewer in [Some(stranger), None] {
        let result = app.state.posts.get(post.id, viewer, &app.cancel).await;
        assert!(matches!(result, Err(AppError::NotFound(_))), "{:?}", viewer);
    }
    for viewer in [author, follower] {
        let fetched = app.state.posts.get(post.id, Some(viewer), &app.cancel).await.unwrap();
        assert_eq!(fetched.content, "inner circle");
    }
}

#[tokio::test]
async fn mentions_match_usernames_regardless_of_case() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let alice = seed_user(&app.store, "Alice");
    seed_user(&app.store, "a_b");
    seed_user(&app.store, "axb");

    app.state
        .writer
        .create(
            author,
            &request(json!({ "variant": "text", "content": "Hello @Alice and @a_b" })),
            &app.cancel,
        )
        .await
        .unwrap();

    let mentions = app.store.rows(tables::POST_MENTIONS);
    assert_eq!(mentions.len(), 2);
    assert!(mentions.iter().any(|m| m["mentioned_user_id"] == json!(alice)));
    let axb = rows_where(&app.store, tables::USERS, "username", "axb");
    assert!(mentions.iter().all(|m| m["mentioned_user_id"] != axb[0]["id"]));
}

#[tokio::test]
async fn deleted_comments_keep_their_replies() {
    let app = test_app();
    let author = seed_user(&app.store, "author");
    let replier = seed_user(&app.store, "replier");
    let post = app
        .state
        .writer
        .create(author, &request(json!({ "variant": "text", "content": "discuss" })), &app.cancel)
        .await
        .unwrap();

    let parent = app
        .state
        .comments
        .create(
            post.id,
            author,
            &CreateCommentRequest {
                content: "first".to_string(),
                parent_comment_id: None,
            },
            &app.cancel,
        )
        .await
        .unwrap();
    let reply = app
        .state
        .comments
        .create(
            post.id,
            replier,
            &CreateCommentRequest {
                content: "reply".to_string(),
                parent_comment_id: Some(parent.id),
            },
            &app.cancel,
        )
        .await
        .unwrap();

    let stranger = app.state.comments.soft_delete(parent.id, replier, &app.cancel).await;
    assert!(matches!(stranger, Err(AppError::Unauthorized(_))));
    app.state.comments.soft_delete(parent.id, author, &app.cancel).await.unwrap();

    app.state.comments.like(reply.id, author, &app.cancel).await.unwrap();
    app.state.comments.like(reply.id, author, &app.cancel).await.unwrap();
    assert_eq!(app.store.rows(tables::COMMENT_LIKES).len(), 1);

    let tree = app.state.comments.list(post.id, Some(author), &app.cancel).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].content, DELETED_SENTINEL);
    assert_eq!(tree[0].replies.len(), 1);
    assert_eq!(tree[0].replies[0].id, reply.id);
    assert!(tree[0].replies[0].is_liked);
    assert_eq!(tree[0].replies[0].likes_count, 1);

    assert_eq!(app.store.rows(tables::POSTS)[0]["comments_count"], 1);
}
