//! Builds a per-thread entity graph from raw thread data.
//!
//! The builder is pure and total: anything it cannot make sense of (bad
//! addresses, empty bodies, an empty thread) is skipped rather than
//! reported, so the worst case is an empty graph.

use std::collections::HashSet;

use tracing::debug;

use super::model::{
    EdgeKind, EntityGraph, EntityNode, NodeIdx, NodeKind, PropertyValue, ThreadFacts, normalize_name,
};
use super::vocabulary::Vocabulary;
use crate::mail::types::{EmailParticipant, EmailThread, parse_mailbox, strip_quoted_text};

/// Second-level labels that sit under a two-letter country code
/// (`acme.co.uk`, `uni.ac.jp`).
const COUNTRY_SECOND_LEVELS: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

#[derive(Debug, Clone)]
pub struct GraphBuilder {
    personal_domains: HashSet<String>,
}

impl GraphBuilder {
    pub fn new<I, S>(personal_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            personal_domains: personal_domains
                .into_iter()
                .map(|d| d.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    pub fn build(&self, thread: &EmailThread, vocabulary: &Vocabulary) -> EntityGraph {
        let mut graph = EntityGraph::new();
        let messages = thread.messages_in_order();

        // Participant list first, then message headers in order.
        let mut people: Vec<NodeIdx> = Vec::new();
        let header_participants = messages.iter().flat_map(|m| {
            std::iter::once(&m.from)
                .chain(m.to.iter())
                .chain(m.cc.iter())
                .chain(m.bcc.iter())
        });
        for participant in thread.participants.iter().chain(header_participants) {
            if let Some(idx) = self.add_person(&mut graph, participant) {
                if !people.contains(&idx) {
                    people.push(idx);
                }
            }
        }

        for message in &messages {
            if let Some(idx) = person_for(&graph, &message.from) {
                bump(graph.node_mut(idx), "messages_sent", 1.0);
            }
        }

        add_co_participants(&mut graph, &people);

        if !vocabulary.is_empty() {
            let first_author = messages.first().and_then(|m| person_for(&graph, &m.from));
            add_mentions(&mut graph, vocabulary, thread.effective_subject(), first_author);
            for message in &messages {
                let author = person_for(&graph, &message.from);
                add_mentions(&mut graph, vocabulary, &strip_quoted_text(&message.body), author);
            }
        }

        graph.facts = ThreadFacts {
            subject: thread.effective_subject().to_string(),
            body: messages
                .iter()
                .map(|m| m.body.as_str())
                .filter(|b| !b.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n\n"),
            snippet: thread.snippet.clone(),
            participants: people
                .iter()
                .map(|idx| graph.node(*idx).display_label())
                .collect(),
            labels: thread.labels.iter().map(|l| l.name.clone()).collect(),
            message_count: thread.messages.len(),
            attachments: messages
                .iter()
                .flat_map(|m| m.attachments.iter().map(|a| a.name.clone()))
                .collect(),
        };

        debug!(
            thread_id = %thread.id,
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            "Built entity graph"
        );
        graph
    }

    fn add_person(&self, graph: &mut EntityGraph, participant: &EmailParticipant) -> Option<NodeIdx> {
        let mailbox = parse_mailbox(&participant.email)?;
        let display_name = participant.name.trim().to_string();

        let (idx, created) = graph.upsert_node(NodeKind::Person, &mailbox.address, || {
            let name = if display_name.is_empty() {
                mailbox.local.clone()
            } else {
                display_name.clone()
            };
            let mut node = EntityNode::new(format!("person:{}", mailbox.address), NodeKind::Person, name);
            node.properties
                .insert("email".into(), mailbox.address.clone().into());
            node.properties
                .insert("domain".into(), mailbox.domain.clone().into());
            node.properties
                .insert("display_name".into(), display_name.clone().into());
            node.properties
                .insert("role".into(), participant.role.as_str().into());
            node.properties
                .insert("messages_sent".into(), PropertyValue::Number(0.0));
            node
        });

        // Name and display name stay as the first occurrence gave them.
        graph.node_mut(idx).add_weight(1.0);

        if created && !self.personal_domains.contains(&mailbox.domain) {
            let company = company_name(&mailbox.domain);
            let key = normalize_name(&company);
            if !key.is_empty() {
                let (company_idx, _) = graph.upsert_node(NodeKind::Company, &key, || {
                    let mut node = EntityNode::new(format!("company:{key}"), NodeKind::Company, company.clone());
                    node.properties
                        .insert("domain".into(), mailbox.domain.clone().into());
                    node
                });
                let edge = graph.add_edge(
                    format!("employed-by:{}->{key}", mailbox.address),
                    idx,
                    company_idx,
                    EdgeKind::EmployedBy,
                );
                graph
                    .edge_mut(edge)
                    .properties
                    .insert("weight".into(), PropertyValue::Number(1.0));
                graph.node_mut(company_idx).add_weight(1.0);
            }
        }

        Some(idx)
    }
}

fn person_for(graph: &EntityGraph, participant: &EmailParticipant) -> Option<NodeIdx> {
    let mailbox = parse_mailbox(&participant.email)?;
    graph.find_node(NodeKind::Person, &mailbox.address)
}

fn add_co_participants(graph: &mut EntityGraph, people: &[NodeIdx]) {
    for (i, a) in people.iter().enumerate() {
        for b in &people[i + 1..] {
            let (first, second) = {
                let la = graph.node(*a).display_label();
                let lb = graph.node(*b).display_label();
                if la <= lb { (la, lb) } else { (lb, la) }
            };
            let id = format!("co-participant:{first}|{second}");
            for (source, target) in [(*a, *b), (*b, *a)] {
                let edge = graph.add_edge(id.clone(), source, target, EdgeKind::CoParticipant);
                graph
                    .edge_mut(edge)
                    .properties
                    .insert("weight".into(), PropertyValue::Number(1.0));
            }
        }
    }
}

fn add_mentions(graph: &mut EntityGraph, vocabulary: &Vocabulary, text: &str, author: Option<NodeIdx>) {
    for (term, count) in vocabulary.scan(text) {
        let node_id = format!("{}:{}", term.kind, term.key);
        let (idx, _) = graph.upsert_node(term.kind, &term.key, || {
            EntityNode::new(node_id.clone(), term.kind, term.name.clone())
        });
        graph.node_mut(idx).add_weight(count as f64);

        if let Some(person) = author {
            let email = graph.node(person).display_label();
            let edge = graph.add_edge(
                format!("mentions:{email}->{node_id}"),
                person,
                idx,
                EdgeKind::Mentions,
            );
            graph.edge_mut(edge).add_weight(count as f64);
        }
    }
}

fn bump(node: &mut EntityNode, key: &str, by: f64) {
    let current = node
        .properties
        .get(key)
        .and_then(PropertyValue::as_number)
        .unwrap_or(0.0);
    node.properties
        .insert(key.to_string(), PropertyValue::Number(current + by));
}

/// Company name from an email domain: the registrable label, capitalized.
///
/// `mail.acme.co.uk` → `Acme`, `client.com` → `Client`.
pub fn company_name(domain: &str) -> String {
    let labels: Vec<&str> = domain
        .trim()
        .trim_end_matches('.')
        .split('.')
        .filter(|l| !l.is_empty())
        .collect();

    let registrable = match labels.len() {
        0 => return String::new(),
        1 => labels[0],
        n if n >= 3
            && labels[n - 1].len() == 2
            && COUNTRY_SECOND_LEVELS.contains(&labels[n - 2]) =>
        {
            labels[n - 3]
        }
        n => labels[n - 2],
    };

    let mut chars = registrable.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::graph::vocabulary::VocabularyEntry;
    use crate::mail::types::{EmailAttachment, EmailLabel, EmailMessage, LabelKind, ParticipantRole};

    fn person(email: &str, name: &str, role: ParticipantRole) -> EmailParticipant {
        EmailParticipant::new(email, name, role)
    }

    fn message(id: &str, from: &str, to: &[&str], body: &str, minutes: i64) -> EmailMessage {
        EmailMessage {
            id: id.into(),
            from: person(from, "", ParticipantRole::From),
            to: to.iter().map(|t| person(t, "", ParticipantRole::To)).collect(),
            cc: vec![],
            bcc: vec![],
            subject: String::new(),
            body: body.into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes),
            attachments: vec![],
        }
    }

    fn renewal_thread() -> EmailThread {
        let mut thread = EmailThread::new("t-1", "Acme renewal: urgent");
        thread.participants = vec![
            person("alice@acme.com", "Alice", ParticipantRole::From),
            person("bob@client.com", "Bob", ParticipantRole::To),
        ];
        thread.messages = vec![
            message("m-1", "alice@acme.com", &["bob@client.com"], "Phoenix pricing is attached.", 0),
            message("m-2", "bob@client.com", &["alice@acme.com"], "Thanks, Phoenix looks good.\n> Phoenix pricing", 5),
        ];
        thread.messages[0].attachments.push(EmailAttachment {
            id: "a-1".into(),
            name: "quote.pdf".into(),
            size: 1024,
            mime_type: "application/pdf".into(),
        });
        thread.labels.push(EmailLabel::new("INBOX", "Inbox", LabelKind::System));
        thread
    }

    fn builder() -> GraphBuilder {
        GraphBuilder::new(["gmail.com"])
    }

    fn phoenix() -> Vocabulary {
        let entries = [VocabularyEntry::new(NodeKind::Project, "Phoenix")];
        Vocabulary::compile(entries.iter())
    }

    #[test]
    fn company_names_use_registrable_label() {
        assert_eq!(company_name("client.com"), "Client");
        assert_eq!(company_name("mail.acme.co.uk"), "Acme");
        assert_eq!(company_name("eng.example.io"), "Example");
        assert_eq!(company_name("localhost"), "Localhost");
        assert_eq!(company_name(""), "");
    }

    #[test]
    fn builds_people_companies_and_edges() {
        let graph = builder().build(&renewal_thread(), &Vocabulary::default());

        let alice = graph.find_node(NodeKind::Person, "alice@acme.com").unwrap();
        let bob = graph.find_node(NodeKind::Person, "bob@client.com").unwrap();
        let acme = graph.find_node(NodeKind::Company, "acme").unwrap();

        assert_eq!(graph.node(alice).name, "Alice");
        assert_eq!(graph.node(alice).property("messages_sent").unwrap().render(), "1");
        // participant list + two message headers
        assert_eq!(graph.node(alice).weight(), 3.0);
        assert_eq!(graph.node(acme).name, "Acme");
        assert!(graph.edge_between(alice, acme, EdgeKind::EmployedBy).is_some());

        let forward = graph.edge_between(alice, bob, EdgeKind::CoParticipant).unwrap();
        let backward = graph.edge_between(bob, alice, EdgeKind::CoParticipant).unwrap();
        assert_ne!(forward, backward);
        assert_eq!(graph.edge(forward).id, graph.edge(backward).id);
    }

    #[test]
    fn person_name_comes_from_first_occurrence() {
        let mut thread = EmailThread::new("t-4", "hello");
        thread.participants = vec![
            person("dana@acme.com", "", ParticipantRole::To),
            person("erin@acme.com", "Erin", ParticipantRole::Cc),
        ];
        thread.messages = vec![message("m-1", "erin@acme.com", &["dana@acme.com"], "", 0)];
        thread.messages[0].to[0].name = "Dana Scully".into();
        thread.messages[0].from.name = "Erin Renamed".into();
        let graph = builder().build(&thread, &Vocabulary::default());

        let dana = graph.find_node(NodeKind::Person, "dana@acme.com").unwrap();
        assert_eq!(graph.node(dana).name, "dana");
        assert_eq!(graph.node(dana).property("display_name").unwrap().render(), "");
        let erin = graph.find_node(NodeKind::Person, "erin@acme.com").unwrap();
        assert_eq!(graph.node(erin).name, "Erin");
    }

    #[test]
    fn personal_domains_do_not_create_companies() {
        let mut thread = EmailThread::new("t-2", "hi");
        thread.participants = vec![person("carol@gmail.com", "Carol", ParticipantRole::From)];
        let graph = builder().build(&thread, &Vocabulary::default());
        assert_eq!(graph.nodes_of_kind(NodeKind::Company).count(), 0);
        assert_eq!(graph.nodes_of_kind(NodeKind::Person).count(), 1);
    }

    #[test]
    fn mentions_accumulate_weight_and_skip_quoted_text() {
        let graph = builder().build(&renewal_thread(), &phoenix());
        let project = graph.find_node(NodeKind::Project, "phoenix").unwrap();
        assert_eq!(graph.nodes_of_kind(NodeKind::Project).count(), 1);
        assert_eq!(graph.node(project).weight(), 2.0);

        let alice = graph.find_node(NodeKind::Person, "alice@acme.com").unwrap();
        let bob = graph.find_node(NodeKind::Person, "bob@client.com").unwrap();
        assert!(graph.edge_between(alice, project, EdgeKind::Mentions).is_some());
        assert!(graph.edge_between(bob, project, EdgeKind::Mentions).is_some());
    }

    #[test]
    fn subject_mentions_are_attributed_to_first_author() {
        let mut thread = renewal_thread();
        thread.subject = "Phoenix renewal".into();
        thread.messages[0].body = String::new();
        thread.messages[1].body = String::new();
        let graph = builder().build(&thread, &phoenix());

        let project = graph.find_node(NodeKind::Project, "phoenix").unwrap();
        let alice = graph.find_node(NodeKind::Person, "alice@acme.com").unwrap();
        let bob = graph.find_node(NodeKind::Person, "bob@client.com").unwrap();
        let edge = graph.edge_between(alice, project, EdgeKind::Mentions).unwrap();
        assert_eq!(graph.edge(edge).weight(), 1.0);
        assert!(graph.edge_between(bob, project, EdgeKind::Mentions).is_none());
    }

    #[test]
    fn thread_facts_are_collected() {
        let graph = builder().build(&renewal_thread(), &Vocabulary::default());
        assert_eq!(graph.facts.subject, "Acme renewal: urgent");
        assert_eq!(graph.facts.message_count, 2);
        assert_eq!(graph.facts.participants, vec!["alice@acme.com", "bob@client.com"]);
        assert_eq!(graph.facts.labels, vec!["Inbox"]);
        assert_eq!(graph.facts.attachments, vec!["quote.pdf"]);
        assert!(graph.facts.body.contains("Phoenix pricing"));
    }

    #[test]
    fn empty_or_garbage_threads_yield_empty_graphs() {
        let empty = builder().build(&EmailThread::new("", ""), &phoenix());
        assert!(empty.is_empty());

        let mut thread = EmailThread::new("t-3", "");
        thread.participants = vec![person("not-an-address", "", ParticipantRole::To)];
        let graph = builder().build(&thread, &phoenix());
        assert!(graph.is_empty());
        assert!(graph.edges().is_empty());
    }
}
