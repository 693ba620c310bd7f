use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Enricher;
use crate::{
    error::AppError,
    models::{
        poll::{Poll, PollOption},
        post::{CreatePostRequest, Extension, Post, PostVariant},
    },
    repository::post::visible_to,
    store::{Filter, Order, Query, Store, StoreError, decode_first, decode_rows, rpc, tables},
    utils::time::{flexible_option, format_timestamp},
};

#[derive(Debug, Deserialize)]
struct PollRow {
    id: Uuid,
    post_id: Uuid,
    question: String,
    #[serde(default, with = "flexible_option")]
    closes_at: Option<DateTime<Utc>>,
    #[serde(default)]
    multi_select: bool,
}

impl PollRow {
    fn into_poll(self, mut options: Vec<PollOption>, selected: Vec<usize>) -> Poll {
        options.sort_by_key(|o| o.position);
        let total_votes = options.iter().map(|o| o.votes_count).sum();
        Poll {
            id: self.id,
            post_id: self.post_id,
            question: self.question,
            closes_at: self.closes_at,
            multi_select: self.multi_select,
            options,
            total_votes,
            selected_options: selected,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VoteRow {
    poll_id: Uuid,
    option_index: usize,
}

pub struct PollEnricher {
    store: Arc<dyn Store>,
}

impl PollEnricher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn load_polls(
        &self,
        post_ids: &[Uuid],
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Poll>, StoreError> {
        let query = Query::new(Filter::new().in_list("post_id", post_ids));
        let rows = self.store.select(tables::POLLS, &query, cancel).await?;
        let polls = decode_rows::<PollRow>(rows)?;
        if polls.is_empty() {
            return Ok(Vec::new());
        }

        let poll_ids: Vec<Uuid> = polls.iter().map(|p| p.id).collect();
        let options_query = Query::new(Filter::new().in_list("poll_id", &poll_ids))
            .order(Order::asc("position"));
        let options = self.store.select(tables::POLL_OPTIONS, &options_query, cancel);
        let votes = async {
            match viewer {
                Some(viewer) => {
                    let query = Query::new(
                        Filter::new()
                            .in_list("poll_id", &poll_ids)
                            .eq("user_id", viewer),
                    )
                    .select("poll_id,option_index");
                    self.store.select(tables::POLL_VOTES, &query, cancel).await
                }
                None => Ok(Vec::new()),
            }
        };
        let (options, votes) = tokio::join!(options, votes);

        let mut options_by_poll: HashMap<Uuid, Vec<PollOption>> = HashMap::new();
        for option in decode_rows::<PollOption>(options?)? {
            options_by_poll.entry(option.poll_id).or_default().push(option);
        }
        let mut selected_by_poll: HashMap<Uuid, Vec<usize>> = HashMap::new();
        for vote in decode_rows::<VoteRow>(votes?)? {
            selected_by_poll.entry(vote.poll_id).or_default().push(vote.option_index);
        }

        Ok(polls
            .into_iter()
            .map(|row| {
                let options = options_by_poll.remove(&row.id).unwrap_or_default();
                let mut selected = selected_by_poll.remove(&row.id).unwrap_or_default();
                selected.sort_unstable();
                row.into_poll(options, selected)
            })
            .collect())
    }

    async fn load_for_post(
        &self,
        post_id: Uuid,
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Poll, AppError> {
        self.load_polls(&[post_id], viewer, cancel)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("Poll not found".to_string()))
    }

    /// Records `viewer`'s selection. Repeating the same selection is a no-op;
    /// changing an existing vote is a conflict.
    pub async fn cast_vote(
        &self,
        post_id: Uuid,
        viewer: Uuid,
        option_indices: &[usize],
        cancel: &CancellationToken,
    ) -> Result<Poll, AppError> {
        let query = Query::new(Filter::new().eq("id", post_id).is_null("deleted_at"));
        let rows = self.store.select(tables::POSTS, &query, cancel).await?;
        let post: Option<Post> = decode_first(rows)?;
        let visible = match &post {
            Some(post) => visible_to(self.store.as_ref(), post, Some(viewer), cancel).await?,
            None => false,
        };
        if !visible {
            return Err(AppError::NotFound("Post not found".to_string()));
        }
        let poll = self.load_for_post(post_id, Some(viewer), cancel).await?;

        if poll.is_closed(Utc::now()) {
            return Err(AppError::Validation("This poll is closed".to_string()));
        }
        let mut chosen = option_indices.to_vec();
        chosen.sort_unstable();
        check_selection(&poll, &chosen)?;

        if !poll.selected_options.is_empty() {
            if poll.selected_options == chosen {
                return Ok(poll);
            }
            return Err(AppError::Conflict("You have already voted on this poll".to_string()));
        }

        let rows: Vec<_> = chosen
            .iter()
            .map(|index| {
                json!({
                    "poll_id": poll.id,
                    "post_id": post_id,
                    "user_id": viewer,
                    "option_index": index,
                })
            })
            .collect();
        match self.store.insert(tables::POLL_VOTES, json!(rows), false, cancel).await {
            Ok(_) => {}
            // A concurrent request from the same viewer won.
            Err(e) if e.is_duplicate() => return self.load_for_post(post_id, Some(viewer), cancel).await,
            Err(e) => return Err(e.into()),
        }

        for index in &chosen {
            let Some(option) = poll.options.iter().find(|o| o.position == *index) else {
                continue;
            };
            let args = json!({ "option_id": option.id, "amount": 1 });
            if let Err(e) = self.store.rpc(rpc::INCREMENT_POLL_VOTES, args, cancel).await {
                if e.is_cancelled() {
                    return Err(AppError::Cancelled);
                }
                tracing::warn!(poll_id = %poll.id, option = index, "Failed to bump vote count: {}", e);
            }
        }

        self.load_for_post(post_id, Some(viewer), cancel).await
    }
}

/// `chosen` must be sorted.
fn check_selection(poll: &Poll, chosen: &[usize]) -> Result<(), AppError> {
    if chosen.is_empty() {
        return Err(AppError::Validation("Select at least one option".to_string()));
    }
    if chosen.windows(2).any(|w| w[0] == w[1]) {
        return Err(AppError::Validation("Options may only be selected once".to_string()));
    }
    let positions: HashSet<usize> = poll.options.iter().map(|o| o.position).collect();
    if let Some(bad) = chosen.iter().find(|i| !positions.contains(i)) {
        return Err(AppError::Validation(format!("Option {} does not exist", bad)));
    }
    if !poll.multi_select && chosen.len() > 1 {
        return Err(AppError::Validation("This poll accepts a single option".to_string()));
    }
    Ok(())
}

#[async_trait]
impl Enricher for PollEnricher {
    fn variant(&self) -> PostVariant {
        PostVariant::Poll
    }

    async fn load_one(
        &self,
        post: &Post,
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<Option<Extension>, StoreError> {
        Ok(self
            .load_polls(&[post.id], viewer, cancel)
            .await?
            .into_iter()
            .next()
            .map(Extension::Poll))
    }

    async fn load_batch(
        &self,
        post_ids: &[Uuid],
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<HashMap<Uuid, Extension>, StoreError> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .load_polls(post_ids, viewer, cancel)
            .await?
            .into_iter()
            .map(|poll| (poll.post_id, Extension::Poll(poll)))
            .collect())
    }

    async fn create(
        &self,
        post: &Post,
        request: &CreatePostRequest,
        cancel: &CancellationToken,
    ) -> Result<Extension, AppError> {
        let payload = request
            .poll
            .as_ref()
            .ok_or_else(|| AppError::Validation("Poll posts require a 'poll' payload".to_string()))?;

        let row = json!({
            "post_id": post.id,
            "question": payload.question,
            "closes_at": payload.closes_at.as_ref().map(format_timestamp),
            "multi_select": payload.multi_select,
        });
        let poll = decode_first::<PollRow>(self.store.insert(tables::POLLS, row, true, cancel).await?)?
            .ok_or_else(|| AppError::Internal("poll insert returned no row".to_string()))?;

        let options: Vec<_> = payload
            .options
            .iter()
            .enumerate()
            .map(|(position, text)| {
                json!({
                    "poll_id": poll.id,
                    "position": position,
                    "text": text.trim(),
                    "votes_count": 0,
                })
            })
            .collect();
        let rows = self
            .store
            .insert(tables::POLL_OPTIONS, json!(options), true, cancel)
            .await?;
        let options = decode_rows::<PollOption>(rows)?;

        Ok(Extension::Poll(poll.into_poll(options, Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(multi_select: bool) -> Poll {
        let poll_id = Uuid::new_v4();
        Poll {
            id: poll_id,
            post_id: Uuid::new_v4(),
            question: "Tabs or spaces?".to_string(),
            closes_at: None,
            multi_select,
            options: (0..3)
                .map(|position| PollOption {
                    id: Uuid::new_v4(),
                    poll_id,
                    position,
                    text: format!("option {}", position),
                    votes_count: 0,
                })
                .collect(),
            total_votes: 0,
            selected_options: Vec::new(),
        }
    }

    #[test]
    fn selection_rules() {
        let single = poll(false);
        assert!(check_selection(&single, &[1]).is_ok());
        assert!(check_selection(&single, &[]).is_err());
        assert!(check_selection(&single, &[3]).is_err());
        assert!(check_selection(&single, &[0, 1]).is_err());

        let multi = poll(true);
        assert!(check_selection(&multi, &[0, 2]).is_ok());
        assert!(check_selection(&multi, &[1, 1]).is_err());
    }
}
