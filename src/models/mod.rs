// src/models/mod.rs

pub mod article;
pub mod comment;
pub mod feed;
pub mod hashtag;
pub mod poll;
pub mod post;
