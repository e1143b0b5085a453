use sim_runtime::{FeedPost, FeedPostKind, FeedState};

/// Page size for feed listings.
pub const FEED_PAGE_SIZE: usize = 10;

/// Append-only discovery feed shared by every agent in a world.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFeed {
    state: FeedState,
}

impl DiscoveryFeed {
    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.state.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.posts.is_empty()
    }

    pub fn create_update(&mut self, author_id: u64, author_name: &str, tick: u64, content: &str) -> u64 {
        self.append(FeedPostKind::Update, author_id, author_name, tick, None, content)
    }

    pub fn create_article(
        &mut self,
        author_id: u64,
        author_name: &str,
        tick: u64,
        title: &str,
        content: &str,
    ) -> u64 {
        self.append(
            FeedPostKind::Article,
            author_id,
            author_name,
            tick,
            Some(title.to_string()),
            content,
        )
    }

    fn append(
        &mut self,
        kind: FeedPostKind,
        author_id: u64,
        author_name: &str,
        tick: u64,
        title: Option<String>,
        content: &str,
    ) -> u64 {
        let id = self.state.next_post_id;
        self.state.next_post_id += 1;
        self.state.posts.push(FeedPost {
            id,
            kind,
            author_id,
            author_name: author_name.to_string(),
            tick,
            title,
            content: content.to_string(),
        });
        id
    }

    /// One page of posts of `kind`, starting at the `start`th post of that kind.
    pub fn page(&self, kind: FeedPostKind, start: usize) -> Vec<&FeedPost> {
        self.state
            .posts
            .iter()
            .filter(|post| post.kind == kind)
            .skip(start)
            .take(FEED_PAGE_SIZE)
            .collect()
    }

    pub fn post(&self, id: u64) -> Option<&FeedPost> {
        self.state.posts.iter().find(|post| post.id == id)
    }
}
