//! Roster management, RFC 3921, section 7.
//!
//! The canonical user of the extension hook: it registers a typed
//! constructor for `jabber:iq:roster` payloads and, at session start,
//! inserts a filter stage that keeps a cache of the roster in sync with
//! pushes from the server.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use minidom::Element;
use tokio::sync::{mpsc, oneshot};

use crate::client::Client;
use crate::error::{Error, ProtocolError};
use crate::extension::Extension;
use crate::jid::Jid;
use crate::ns;
use crate::stanza::{Iq, IqType, Nested, Stanza, StanzaError};

/// One roster entry. See RFC 3921, section 7.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterItem {
    /// The contact's address.
    pub jid: Jid,
    /// Display name assigned by the user.
    pub name: Option<String>,
    /// none, to, from, both, or remove.
    pub subscription: Option<String>,
    /// Groups the contact is filed under.
    pub groups: Vec<String>,
}

/// The `<query xmlns="jabber:iq:roster"/>` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterQuery {
    /// The items carried by this query.
    pub items: Vec<RosterItem>,
}

impl RosterQuery {
    pub(crate) fn parse(el: &Element) -> Result<RosterQuery, Error> {
        let mut items = Vec::new();
        for child in el.children() {
            if !child.is("item", ns::ROSTER) {
                continue;
            }
            let jid: Jid = child
                .attr("jid")
                .ok_or(ProtocolError::BadAttribute("jid"))?
                .parse()?;
            items.push(RosterItem {
                jid,
                name: child.attr("name").map(str::to_owned),
                subscription: child.attr("subscription").map(str::to_owned),
                groups: child
                    .children()
                    .filter(|group| group.is("group", ns::ROSTER))
                    .map(Element::text)
                    .collect(),
            });
        }
        Ok(RosterQuery { items })
    }
}

impl From<RosterQuery> for Element {
    fn from(query: RosterQuery) -> Element {
        let mut builder = Element::builder("query", ns::ROSTER);
        for item in query.items {
            let mut item_builder =
                Element::builder("item", ns::ROSTER).attr("jid", item.jid.to_string());
            if let Some(name) = item.name {
                item_builder = item_builder.attr("name", name);
            }
            if let Some(subscription) = item.subscription {
                item_builder = item_builder.attr("subscription", subscription);
            }
            for group in item.groups {
                item_builder = item_builder.append(
                    Element::builder("group", ns::ROSTER)
                        .append(minidom::Node::Text(group))
                        .build(),
                );
            }
            builder = builder.append(item_builder.build());
        }
        builder.build()
    }
}

/// The roster extension entry for [`Client::new`].
pub fn extension() -> Extension {
    Extension {
        namespace: ns::ROSTER,
        parse: parse_nested,
        start,
    }
}

pub(crate) fn parse_nested(el: &Element) -> Result<Nested, Error> {
    Ok(Nested::new(RosterQuery::parse(el)?))
}

pub(crate) enum RosterCommand {
    /// The initial fetch was sent with this id; complete `done` once its
    /// result populated the cache.
    ExpectFetch {
        id: String,
        done: oneshot::Sender<Result<(), StanzaError>>,
    },
    /// Reply with a copy of the cache.
    Snapshot(oneshot::Sender<HashMap<Jid, RosterItem>>),
}

/// Session-start hook: install the cache filter, then fetch the roster
/// and wait for the cache to be populated.
fn start(client: &mut Client) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>> {
    Box::pin(async move {
        let (upstream, downstream) = client.add_filter();
        let (command_tx, command_rx) = mpsc::channel(4);
        tokio::spawn(filter(upstream, downstream, command_rx, client.out()));
        client.set_roster_channel(command_tx.clone());

        let id = client.next_id().await;
        let (done_tx, done_rx) = oneshot::channel();
        command_tx
            .send(RosterCommand::ExpectFetch {
                id: id.clone(),
                done: done_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;

        let mut fetch = Iq::get(&id, RosterQuery::default().into());
        fetch.from = Some(client.jid());
        client.send(fetch).await?;

        done_rx
            .await
            .map_err(|_| Error::Closed)?
            .map_err(Error::Stanza)?;
        Ok(())
    })
}

fn roster_query(stanza: &Stanza) -> Option<&RosterQuery> {
    stanza
        .nested()
        .iter()
        .find_map(|nested| nested.downcast_ref::<RosterQuery>())
}

fn apply_item(cache: &mut HashMap<Jid, RosterItem>, item: &RosterItem) {
    if item.subscription.as_deref() == Some("remove") {
        cache.remove(&item.jid);
    } else {
        cache.insert(item.jid.clone(), item.clone());
    }
}

/// The mid-pipeline filter task. It owns the cache: snapshots travel by
/// message, so there is no shared mutable state with the application.
async fn filter(
    mut upstream: mpsc::Receiver<Stanza>,
    downstream: mpsc::Sender<Stanza>,
    mut commands: mpsc::Receiver<RosterCommand>,
    out: mpsc::Sender<Stanza>,
) {
    let mut cache: HashMap<Jid, RosterItem> = HashMap::new();
    let mut pending_fetch: Option<(String, oneshot::Sender<Result<(), StanzaError>>)> = None;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(RosterCommand::ExpectFetch { id, done }) => {
                    pending_fetch = Some((id, done));
                }
                Some(RosterCommand::Snapshot(reply)) => {
                    let _ = reply.send(cache.clone());
                }
                None => break,
            },
            stanza = upstream.recv() => {
                let Some(stanza) = stanza else { break };

                // The answer to our own fetch is consumed here.
                let is_fetch_result = matches!(
                    (&stanza, pending_fetch.as_ref()),
                    (Stanza::Iq(_), Some((id, _))) if stanza.id() == Some(id.as_str())
                );
                if is_fetch_result {
                    let Some((_, done)) = pending_fetch.take() else {
                        continue;
                    };
                    if stanza.is_error() {
                        let error = stanza.error().cloned().unwrap_or(StanzaError {
                            type_: "cancel".to_owned(),
                            condition: None,
                        });
                        log::error!("roster fetch failed: {}", error);
                        let _ = done.send(Err(error));
                    } else {
                        cache.clear();
                        if let Some(query) = roster_query(&stanza) {
                            for item in &query.items {
                                apply_item(&mut cache, item);
                            }
                        }
                        let _ = done.send(Ok(()));
                    }
                    continue;
                }

                // Roster pushes update the cache, get acknowledged, and
                // are forwarded unchanged.
                let push = match &stanza {
                    Stanza::Iq(iq) if iq.type_ == IqType::Set => roster_query(&stanza),
                    _ => None,
                };
                if let Some(query) = push {
                    for item in &query.items {
                        apply_item(&mut cache, item);
                    }
                    if let Some(id) = stanza.id() {
                        // RFC 3921 requires a result iq for every push.
                        if out.send(Stanza::Iq(Iq::result(id))).await.is_err() {
                            break;
                        }
                    }
                }

                if downstream.send(stanza).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::xml::element_to_string;

    fn item(jid: &str, subscription: Option<&str>) -> RosterItem {
        RosterItem {
            jid: jid.parse().unwrap(),
            name: None,
            subscription: subscription.map(str::to_owned),
            groups: Vec::new(),
        }
    }

    #[test]
    fn parses_items() {
        let el: Element = r#"<query xmlns="jabber:iq:roster"><item jid="a@b.c" name="A" subscription="both"><group>Friends</group></item><item jid="d@e.f"/></query>"#
            .parse()
            .unwrap();
        let query = RosterQuery::parse(&el).unwrap();
        assert_eq!(query.items.len(), 2);
        assert_eq!(query.items[0].jid.to_string(), "a@b.c");
        assert_eq!(query.items[0].name.as_deref(), Some("A"));
        assert_eq!(query.items[0].subscription.as_deref(), Some("both"));
        assert_eq!(query.items[0].groups, vec!["Friends"]);
        assert_eq!(query.items[1].jid.to_string(), "d@e.f");
    }

    #[test]
    fn item_without_jid_is_an_error() {
        let el: Element = r#"<query xmlns="jabber:iq:roster"><item name="A"/></query>"#
            .parse()
            .unwrap();
        assert!(RosterQuery::parse(&el).is_err());
    }

    #[test]
    fn marshals_query() {
        let query = RosterQuery {
            items: vec![RosterItem {
                jid: "a@b.c".parse().unwrap(),
                name: Some("A".to_owned()),
                subscription: None,
                groups: vec!["Friends".to_owned()],
            }],
        };
        let el: Element = query.into();
        assert_eq!(
            element_to_string(&el, ns::JABBER_CLIENT),
            r#"<query xmlns="jabber:iq:roster"><item jid="a@b.c" name="A"><group>Friends</group></item></query>"#
        );
    }

    #[test]
    fn cache_applies_updates_and_removals() {
        let mut cache = HashMap::new();
        let a = item("a@x.y", Some("none"));
        let b = item("b@x.y", Some("none"));
        let a2 = item("a@x.y", Some("both"));

        apply_item(&mut cache, &a);
        apply_item(&mut cache, &b);
        apply_item(&mut cache, &a2);
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache[&a.jid].subscription.as_deref(),
            Some("both"),
            "later item must replace the earlier one"
        );

        apply_item(&mut cache, &item("a@x.y", Some("remove")));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&b.jid));
    }
}
