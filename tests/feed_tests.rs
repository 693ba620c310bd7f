// tests/feed_tests.rs

mod common;

use std::time::Duration;

use common::{hours_ago, minutes_ago, post_row, seed_article, seed_post, seed_user, test_app};
use serde_json::json;
use socialfeed::{
    error::AppError,
    feed::FeedKind,
    models::post::{CreatePostRequest, PostVariant},
    store::tables,
    utils::time::format_timestamp,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[tokio::test]
async fn home_feed_stitches_one_query_per_concern() {
    let app = test_app();
    let authors = [
        seed_user(&app.store, "ada"),
        seed_user(&app.store, "brian"),
        seed_user(&app.store, "carla"),
    ];
    let viewer = seed_user(&app.store, "viewer");

    // Newest first: post 0 was published a minute ago, post 24 twenty-five.
    let mut ids = Vec::new();
    for i in 0..25 {
        let variant = if i % 3 == 0 { "article" } else { "text" };
        let id = seed_post(
            &app.store,
            post_row(authors[i % 3], variant, minutes_ago(i as i64 + 1)),
        );
        if variant == "article" {
            seed_article(&app.store, id, &format!("Article {}", i), &format!("article-{}", i));
        }
        ids.push(id);
    }
    app.store.seed(
        tables::POST_LIKES,
        vec![
            json!({ "post_id": ids[1], "user_id": viewer }),
            json!({ "post_id": ids[12], "user_id": viewer }),
        ],
    );
    app.store.seed(
        tables::SAVED_POSTS,
        vec![json!({ "post_id": ids[3], "user_id": viewer })],
    );
    app.store.clear_calls();

    let page = app
        .state
        .feeds
        .page(&FeedKind::Home, Some(viewer), 10, 0, &app.cancel)
        .await
        .unwrap();

    assert_eq!(page.total, 25);
    assert!(page.has_more());
    let got: Vec<Uuid> = page.posts.iter().map(|p| p.id).collect();
    assert_eq!(got, ids[..10].to_vec());

    for (i, post) in page.posts.iter().enumerate() {
        let author = post.author.as_ref().expect("author embedded");
        assert_eq!(author.id, authors[i % 3]);
        assert_eq!(post.is_liked, i == 1);
        assert_eq!(post.is_saved, i == 3);
        if i % 3 == 0 {
            assert_eq!(post.variant, PostVariant::Article);
            let article = post.article.as_ref().expect("article attached");
            assert_eq!(article.slug, format!("article-{}", i));
        } else {
            assert!(post.article.is_none());
        }
    }

    assert_eq!(app.store.call_count("select", tables::POSTS), 1);
    assert_eq!(app.store.call_count("count", tables::POSTS), 1);
    assert_eq!(app.store.call_count("select", tables::POST_LIKES), 1);
    assert_eq!(app.store.call_count("select", tables::SAVED_POSTS), 1);
    assert_eq!(app.store.call_count("select", tables::ARTICLES), 1);
    assert_eq!(app.store.call_count("select", tables::USERS), 0);
}

fn seed_poll(app: &common::TestApp, post_id: Uuid, question: &str) -> Uuid {
    let poll_id = Uuid::new_v4();
    app.store.seed(
        tables::POLLS,
        vec![json!({
            "id": poll_id,
            "post_id": post_id,
            "question": question,
            "closes_at": null,
            "multi_select": false,
        })],
    );
    let options = ["yes", "no"]
        .iter()
        .enumerate()
        .map(|(position, text)| {
            json!({
                "id": Uuid::new_v4(),
                "poll_id": poll_id,
                "position": position,
                "text": text,
                "votes_count": 0,
            })
        })
        .collect();
    app.store.seed(tables::POLL_OPTIONS, options);
    poll_id
}

#[tokio::test]
async fn home_feed_mixes_articles_polls_and_text() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");
    let viewer = seed_user(&app.store, "viewer");

    let variants = ["article", "poll", "text", "poll", "article", "text"];
    let mut ids = Vec::new();
    for (i, variant) in variants.iter().enumerate() {
        let id = seed_post(&app.store, post_row(author, variant, minutes_ago(i as i64 + 1)));
        match *variant {
            "article" => {
                seed_article(&app.store, id, &format!("Article {}", i), &format!("article-{}", i));
            }
            "poll" => {
                seed_poll(&app, id, &format!("Question {}?", i));
            }
            _ => {}
        }
        ids.push(id);
    }
    app.state.polls.cast_vote(ids[3], viewer, &[1], &app.cancel).await.unwrap();
    app.store.clear_calls();

    let page = app
        .state
        .feeds
        .page(&FeedKind::Home, Some(viewer), 10, 0, &app.cancel)
        .await
        .unwrap();

    assert_eq!(page.total, 6);
    let got: Vec<Uuid> = page.posts.iter().map(|p| p.id).collect();
    assert_eq!(got, ids);

    for (i, post) in page.posts.iter().enumerate() {
        match variants[i] {
            "article" => {
                assert_eq!(post.variant, PostVariant::Article);
                let article = post.article.as_ref().expect("article attached");
                assert_eq!(article.slug, format!("article-{}", i));
                assert!(post.poll.is_none());
            }
            "poll" => {
                assert_eq!(post.variant, PostVariant::Poll);
                let poll = post.poll.as_ref().expect("poll attached");
                assert_eq!(poll.question, format!("Question {}?", i));
                assert_eq!(poll.options.len(), 2);
                assert!(post.article.is_none());
            }
            _ => {
                assert!(post.article.is_none());
                assert!(post.poll.is_none());
            }
        }
    }

    let voted = page.posts[3].poll.as_ref().expect("poll attached");
    assert_eq!(voted.selected_options, vec![1]);
    assert_eq!(voted.options[1].votes_count, 1);
    assert_eq!(voted.total_votes, 1);
    let untouched = page.posts[1].poll.as_ref().expect("poll attached");
    assert!(untouched.selected_options.is_empty());
    assert_eq!(untouched.total_votes, 0);

    assert_eq!(app.store.call_count("select", tables::POSTS), 1);
    assert_eq!(app.store.call_count("select", tables::ARTICLES), 1);
    assert_eq!(app.store.call_count("select", tables::POLLS), 1);
    assert_eq!(app.store.call_count("select", tables::POLL_OPTIONS), 1);
    assert_eq!(app.store.call_count("select", tables::POLL_VOTES), 1);
}

#[tokio::test]
async fn second_page_and_zero_limit() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");
    let mut ids = Vec::new();
    for i in 0..25 {
        ids.push(seed_post(&app.store, post_row(author, "text", minutes_ago(i + 1))));
    }

    let page = app
        .state
        .feeds
        .page(&FeedKind::Home, None, 10, 20, &app.cancel)
        .await
        .unwrap();
    let got: Vec<Uuid> = page.posts.iter().map(|p| p.id).collect();
    assert_eq!(got, ids[20..].to_vec());
    assert!(!page.has_more());
    assert!(page.posts.iter().all(|p| !p.is_liked && !p.is_saved));

    app.store.clear_calls();
    let empty = app
        .state
        .feeds
        .page(&FeedKind::Home, None, 0, 0, &app.cancel)
        .await
        .unwrap();
    assert!(empty.posts.is_empty());
    assert_eq!(empty.total, 25);
    assert_eq!(app.store.call_count("select", tables::POSTS), 0);
}

#[tokio::test]
async fn hidden_posts_never_reach_public_feeds() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");

    let visible = seed_post(&app.store, post_row(author, "text", minutes_ago(1)));

    let mut deleted = post_row(author, "text", minutes_ago(2));
    deleted["deleted_at"] = json!(format_timestamp(&minutes_ago(1)));
    seed_post(&app.store, deleted);

    let mut draft = post_row(author, "text", minutes_ago(3));
    draft["is_published"] = json!(false);
    draft["is_draft"] = json!(true);
    seed_post(&app.store, draft);

    let mut private = post_row(author, "text", minutes_ago(4));
    private["visibility"] = json!("private");
    seed_post(&app.store, private);

    for kind in [FeedKind::Home, FeedKind::Explore] {
        let page = app.state.feeds.page(&kind, None, 20, 0, &app.cancel).await.unwrap();
        assert_eq!(page.total, 1, "{} feed", kind.name());
        assert_eq!(page.posts[0].id, visible);
    }
}

#[tokio::test]
async fn explore_orders_by_likes_then_recency() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");

    let quiet = seed_post(&app.store, post_row(author, "text", minutes_ago(1)));
    let mut popular = post_row(author, "text", minutes_ago(30));
    popular["likes_count"] = json!(12);
    let popular = seed_post(&app.store, popular);
    let mut liked_newer = post_row(author, "text", minutes_ago(5));
    liked_newer["likes_count"] = json!(3);
    let liked_newer = seed_post(&app.store, liked_newer);
    let mut liked_older = post_row(author, "text", minutes_ago(10));
    liked_older["likes_count"] = json!(3);
    let liked_older = seed_post(&app.store, liked_older);

    let page = app
        .state
        .feeds
        .page(&FeedKind::Explore, None, 10, 0, &app.cancel)
        .await
        .unwrap();
    let got: Vec<Uuid> = page.posts.iter().map(|p| p.id).collect();
    assert_eq!(got, vec![popular, liked_newer, liked_older, quiet]);
}

#[tokio::test]
async fn cancelled_request_returns_no_page() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");
    for i in 0..3 {
        let id = seed_post(&app.store, post_row(author, "article", minutes_ago(i + 1)));
        seed_article(&app.store, id, "Slow", &format!("slow-{}", i));
    }
    app.store.set_latency(tables::ARTICLES, Duration::from_secs(5));

    let feeds = app.state.feeds.clone();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        feeds.page(&FeedKind::Home, None, 10, 0, &token).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("page returns promptly after cancellation")
        .expect("task did not panic");
    assert!(matches!(result, Err(AppError::Cancelled)));
}

#[tokio::test]
async fn missing_extension_rows_and_failed_flag_lookups_degrade() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");
    let viewer = seed_user(&app.store, "viewer");

    let orphan = seed_post(&app.store, post_row(author, "article", minutes_ago(1)));
    let with_row = seed_post(&app.store, post_row(author, "article", minutes_ago(2)));
    seed_article(&app.store, with_row, "Present", "present");
    app.store.seed(
        tables::POST_LIKES,
        vec![json!({ "post_id": with_row, "user_id": viewer })],
    );
    app.store.fail_table(tables::POST_LIKES);

    let page = app
        .state
        .feeds
        .page(&FeedKind::Home, Some(viewer), 10, 0, &app.cancel)
        .await
        .unwrap();

    assert_eq!(page.posts.len(), 2);
    assert_eq!(page.posts[0].id, orphan);
    assert!(page.posts[0].article.is_none());
    assert_eq!(page.posts[1].id, with_row);
    assert!(page.posts[1].article.is_some());
    assert!(page.posts.iter().all(|p| !p.is_liked));
}

#[tokio::test]
async fn failed_enricher_keeps_base_posts() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");
    let id = seed_post(&app.store, post_row(author, "article", minutes_ago(1)));
    seed_article(&app.store, id, "Gone", "gone");
    app.store.fail_table(tables::ARTICLES);

    let page = app
        .state
        .feeds
        .page(&FeedKind::Home, None, 10, 0, &app.cancel)
        .await
        .unwrap();
    assert_eq!(page.posts.len(), 1);
    assert!(page.posts[0].article.is_none());
}

#[tokio::test]
async fn failed_base_query_fails_the_page() {
    let app = test_app();
    app.store.fail_table(tables::POSTS);

    let result = app
        .state
        .feeds
        .page(&FeedKind::Home, None, 10, 0, &app.cancel)
        .await;
    assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
}

#[tokio::test]
async fn hashtag_feed_lists_tagged_posts() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");

    let mut tagged = Vec::new();
    for content in ["learning #Rust", "more #rust today", "nothing here", "#go instead"] {
        let request: CreatePostRequest =
            serde_json::from_value(json!({ "variant": "text", "content": content })).unwrap();
        let post = app.state.writer.create(author, &request, &app.cancel).await.unwrap();
        if content.to_lowercase().contains("#rust") {
            tagged.push(post.id);
        }
    }

    let page = app
        .state
        .feeds
        .page(&FeedKind::Hashtag("rust".to_string()), None, 10, 0, &app.cancel)
        .await
        .unwrap();
    let mut got: Vec<Uuid> = page.posts.iter().map(|p| p.id).collect();
    got.sort();
    tagged.sort();
    assert_eq!(got, tagged);
    assert_eq!(page.total, 2);

    let unknown = app
        .state
        .feeds
        .page(&FeedKind::Hashtag("nope".to_string()), None, 10, 0, &app.cancel)
        .await;
    assert!(matches!(unknown, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn saved_feed_follows_save_order() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");
    let viewer = seed_user(&app.store, "viewer");

    let first = seed_post(&app.store, post_row(author, "text", minutes_ago(30)));
    let second = seed_post(&app.store, post_row(author, "text", minutes_ago(20)));
    let third = seed_post(&app.store, post_row(author, "text", minutes_ago(10)));
    seed_post(&app.store, post_row(author, "text", minutes_ago(5)));

    // Saved oldest post most recently.
    app.store.seed(
        tables::SAVED_POSTS,
        vec![
            json!({ "post_id": third, "user_id": viewer, "created_at": format_timestamp(&minutes_ago(3)) }),
            json!({ "post_id": second, "user_id": viewer, "created_at": format_timestamp(&minutes_ago(2)) }),
            json!({ "post_id": first, "user_id": viewer, "created_at": format_timestamp(&minutes_ago(1)) }),
        ],
    );

    let page = app
        .state
        .feeds
        .page(&FeedKind::Saved, Some(viewer), 10, 0, &app.cancel)
        .await
        .unwrap();
    let got: Vec<Uuid> = page.posts.iter().map(|p| p.id).collect();
    assert_eq!(got, vec![first, second, third]);
    assert!(page.posts.iter().all(|p| p.is_saved));

    let anonymous = app
        .state
        .feeds
        .page(&FeedKind::Saved, None, 10, 0, &app.cancel)
        .await;
    assert!(matches!(anonymous, Err(AppError::AuthError(_))));
}

#[tokio::test]
async fn following_feed_only_shows_followed_authors() {
    let app = test_app();
    let followed = seed_user(&app.store, "followed");
    let stranger = seed_user(&app.store, "stranger");
    let viewer = seed_user(&app.store, "viewer");
    let loner = seed_user(&app.store, "loner");

    let theirs = seed_post(&app.store, post_row(followed, "text", minutes_ago(2)));
    seed_post(&app.store, post_row(stranger, "text", minutes_ago(1)));
    app.store.seed(
        tables::FOLLOWS,
        vec![json!({ "follower_id": viewer, "following_id": followed })],
    );

    let page = app
        .state
        .feeds
        .page(&FeedKind::Following, Some(viewer), 10, 0, &app.cancel)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.posts[0].id, theirs);

    let nobody = app
        .state
        .feeds
        .page(&FeedKind::Following, Some(loner), 10, 0, &app.cancel)
        .await
        .unwrap();
    assert!(nobody.posts.is_empty());
    assert_eq!(nobody.total, 0);

    let anonymous = app
        .state
        .feeds
        .page(&FeedKind::Following, None, 10, 0, &app.cancel)
        .await;
    assert!(matches!(anonymous, Err(AppError::AuthError(_))));
}

#[tokio::test]
async fn user_feed_shows_private_posts_to_their_author_only() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");
    let stranger = seed_user(&app.store, "stranger");

    seed_post(&app.store, post_row(author, "text", minutes_ago(2)));
    let mut private = post_row(author, "text", minutes_ago(1));
    private["visibility"] = json!("private");
    let private = seed_post(&app.store, private);

    let own = app
        .state
        .feeds
        .page(&FeedKind::User(author), Some(author), 10, 0, &app.cancel)
        .await
        .unwrap();
    assert_eq!(own.total, 2);
    assert_eq!(own.posts[0].id, private);

    let other = app
        .state
        .feeds
        .page(&FeedKind::User(author), Some(stranger), 10, 0, &app.cancel)
        .await
        .unwrap();
    assert_eq!(other.total, 1);
    assert!(other.posts.iter().all(|p| p.id != private));
}

#[tokio::test]
async fn trending_scores_decay_with_post_age() {
    let app = test_app();
    let author = seed_user(&app.store, "ada");

    let fresh = Uuid::new_v4();
    let stale = Uuid::new_v4();
    let unused = Uuid::new_v4();
    app.store.seed(
        tables::HASHTAGS,
        vec![
            json!({ "id": fresh, "tag": "fresh", "posts_count": 0, "followers_count": 0, "trending_score": 0.0 }),
            json!({ "id": stale, "tag": "stale", "posts_count": 0, "followers_count": 0, "trending_score": 0.0 }),
            json!({ "id": unused, "tag": "unused", "posts_count": 0, "followers_count": 0, "trending_score": 0.0 }),
        ],
    );
    let recent = seed_post(&app.store, post_row(author, "text", hours_ago(1)));
    let old = seed_post(&app.store, post_row(author, "text", hours_ago(25)));
    let ancient = seed_post(&app.store, post_row(author, "text", hours_ago(24 * 8)));
    app.store.seed(
        tables::POST_HASHTAGS,
        vec![
            json!({ "post_id": recent, "hashtag_id": fresh }),
            json!({ "post_id": old, "hashtag_id": stale }),
            json!({ "post_id": ancient, "hashtag_id": unused }),
        ],
    );

    app.state.scorer.recompute(&app.cancel).await.unwrap();

    let trending = app.state.hashtags.trending(10, &app.cancel).await.unwrap();
    assert_eq!(trending[0].tag, "fresh");
    assert!((trending[0].trending_score - 0.959).abs() < 0.005);
    assert_eq!(trending[1].tag, "stale");
    assert!((trending[1].trending_score - 0.353).abs() < 0.005);
    assert_eq!(trending[2].tag, "unused");
    assert_eq!(trending[2].trending_score, 0.0);
}
