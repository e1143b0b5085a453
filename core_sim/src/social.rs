//! Talking to NPCs and the shared discovery feed.

use sim_runtime::{ActionKind, ActionResult, CommandArg, FeedPost, FeedPostKind};
use tracing::info;

use crate::{
    dialog::{DialogError, Transition},
    entity::{Capabilities, EntityId},
    feed::FEED_PAGE_SIZE,
    interpreter::{Guard, ResolvedArgs},
    World,
};

/// Action type recorded for numbered dialog replies.
pub const DIALOG_OPTION_ACTION: &str = "CHOSEN_DIALOG_OPTION";

impl World {
    pub(crate) fn talk(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        let target = args.first(ActionKind::Talk)?;
        let name = self.name_of(target);
        if target == agent {
            return Err(ActionResult::rejected("Talking to yourself gets you nowhere."));
        }
        self.within_reach(agent, target)?;
        let dialogable = self
            .store
            .get(target)
            .is_some_and(|entity| entity.has(Capabilities::DIALOGABLE) && entity.dialog.is_some());
        if !dialogable {
            return Err(ActionResult::rejected(format!("The {name} has nothing to say.")));
        }
        let transition = self
            .initiate_dialog(agent, target)
            .map_err(|err| self.dialog_rejection(target, err))?;
        Ok(ActionResult::ok(render_transition(&name, &transition)).high())
    }

    /// Answer the current dialog node with its `index`th reply (0-based).
    pub fn choose_dialog_option(&mut self, agent: EntityId, index: i64) -> ActionResult {
        let result = self
            .dialog_option_guards(agent, index)
            .unwrap_or_else(|rejection| rejection);
        if self.store.get(agent).is_some_and(|entity| entity.is_agent()) {
            self.finish_action(
                agent,
                DIALOG_OPTION_ACTION,
                Some(CommandArg::Text(index.to_string())),
                None,
                true,
                &result,
            );
        }
        result
    }

    fn dialog_option_guards(&mut self, agent: EntityId, index: i64) -> Guard<ActionResult> {
        let npc = match self.dialog_owner(agent) {
            Some(npc) if npc != agent => npc,
            _ => return Err(ActionResult::rejected("You are not in a conversation.")),
        };
        if self.turns.check(agent).is_err() {
            return Err(ActionResult::rejected("You have already acted this step."));
        }
        let options = self
            .store
            .get(npc)
            .and_then(|entity| entity.dialog.as_ref())
            .and_then(|dialog| dialog.current_node())
            .map(|node| node.options())
            .unwrap_or_default();
        let reply = usize::try_from(index)
            .ok()
            .and_then(|index| options.get(index))
            .cloned()
            .ok_or_else(|| {
                ActionResult::rejected(format!(
                    "There is no dialog option {index}. Choose 0 to {}.",
                    options.len().saturating_sub(1)
                ))
            })?;
        let transition = self
            .say_in_dialog(agent, npc, &reply)
            .map_err(|err| self.dialog_rejection(npc, err))?;
        Ok(ActionResult::ok(render_transition(&self.name_of(npc), &transition)).high())
    }

    fn dialog_rejection(&self, npc: EntityId, err: DialogError) -> ActionResult {
        match err {
            DialogError::WrongPartner { .. } => ActionResult::rejected(format!(
                "The {} is busy talking to someone else.",
                self.name_of(npc)
            )),
            other => ActionResult::rejected(other.to_string()),
        }
    }

    pub(crate) fn feed_updates(&self, start: Option<&CommandArg>) -> ActionResult {
        self.feed_listing(FeedPostKind::Update, start)
    }

    pub(crate) fn feed_articles(&self, start: Option<&CommandArg>) -> ActionResult {
        self.feed_listing(FeedPostKind::Article, start)
    }

    fn feed_listing(&self, kind: FeedPostKind, start: Option<&CommandArg>) -> ActionResult {
        let start = start.and_then(CommandArg::as_id).unwrap_or(0) as usize;
        let posts = self.feed.page(kind, start);
        let label = match kind {
            FeedPostKind::Update => "updates",
            FeedPostKind::Article => "articles",
        };
        if posts.is_empty() {
            return ActionResult::ok(format!("There are no {label} from position {start}."))
                .with_feed_posts(Vec::new());
        }
        let lines: Vec<String> = posts.iter().map(|post| summary_line(post)).collect();
        let ids = posts.iter().map(|post| post.id).collect();
        let more = if posts.len() == FEED_PAGE_SIZE {
            format!("\nMore {label} may follow from position {}.", start + FEED_PAGE_SIZE)
        } else {
            String::new()
        };
        ActionResult::ok(format!("{}{more}", lines.join("\n"))).with_feed_posts(ids)
    }

    pub(crate) fn feed_post(&self, id: Option<&CommandArg>) -> Guard<ActionResult> {
        let Some(id) = id.and_then(CommandArg::as_id) else {
            return Err(ActionResult::rejected(format!(
                "{} needs a post id.",
                ActionKind::DiscoveryFeedGetPostById
            )));
        };
        let post = self
            .feed
            .post(id)
            .ok_or_else(|| ActionResult::rejected(format!("There is no post #{id}.")))?;
        let body = match &post.title {
            Some(title) => format!("{}\n{title}\n\n{}", summary_header(post), post.content),
            None => format!("{}\n{}", summary_header(post), post.content),
        };
        Ok(ActionResult::ok(body).with_feed_posts(vec![post.id]))
    }

    pub(crate) fn feed_create_update(
        &mut self,
        agent: EntityId,
        text: Option<&CommandArg>,
    ) -> Guard<ActionResult> {
        let content = text.map(CommandArg::as_text).unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ActionResult::rejected("An update needs some text."));
        }
        let author = self.name_of(agent);
        let id = self
            .feed
            .create_update(agent.0, &author, self.tick, content.trim());
        info!(target: "tileworld::feed", agent = %agent, post = id, "feed.update_posted");
        Ok(ActionResult::ok(format!("Posted update #{id}.")).with_feed_posts(vec![id]))
    }

    pub(crate) fn feed_create_article(
        &mut self,
        agent: EntityId,
        title: Option<&CommandArg>,
        body: Option<&CommandArg>,
    ) -> Guard<ActionResult> {
        let title = title.map(CommandArg::as_text).unwrap_or_default();
        let body = body.map(CommandArg::as_text).unwrap_or_default();
        if title.trim().is_empty() || body.trim().is_empty() {
            return Err(ActionResult::rejected("An article needs a title and a body."));
        }
        let author = self.name_of(agent);
        let id = self
            .feed
            .create_article(agent.0, &author, self.tick, title.trim(), body.trim());
        info!(target: "tileworld::feed", agent = %agent, post = id, "feed.article_posted");
        Ok(ActionResult::ok(format!("Posted article #{id}: {}.", title.trim()))
            .with_feed_posts(vec![id]))
    }
}

/// NPC line followed by the numbered replies, or a closing note.
pub fn render_transition(speaker: &str, transition: &Transition) -> String {
    let mut text = format!("{speaker}: \"{}\"", transition.line);
    if transition.ended {
        text.push_str("\n(The conversation is over.)");
    } else {
        for (index, option) in transition.options.iter().enumerate() {
            text.push_str(&format!("\n{index}: {option}"));
        }
    }
    text
}

fn summary_header(post: &FeedPost) -> String {
    format!("#{} [{}, tick {}]", post.id, post.author_name, post.tick)
}

fn summary_line(post: &FeedPost) -> String {
    match &post.title {
        Some(title) => format!("{} {title}", summary_header(post)),
        None => format!("{} {}", summary_header(post), post.content),
    }
}
