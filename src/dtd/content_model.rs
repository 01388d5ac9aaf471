//! Element content models and the automata that check them.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{Arc, OnceLock},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Occurrence {
    #[default]
    Once,
    /// `?`
    ZeroOrOne,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

impl std::fmt::Display for Occurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Once => Ok(()),
            Self::ZeroOrOne => write!(f, "?"),
            Self::ZeroOrMore => write!(f, "*"),
            Self::OneOrMore => write!(f, "+"),
        }
    }
}

/// ```text
/// [47] children ::= (choice | seq) ('?' | '*' | '+')?
/// [48] cp       ::= (Name | choice | seq) ('?' | '*' | '+')?
/// [49] choice   ::= '(' S? cp ( S? '|' S? cp )+ S? ')'
/// [50] seq      ::= '(' S? cp ( S? ',' S? cp )* S? ')'
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentParticle {
    Name(Arc<str>, Occurrence),
    Sequence(Vec<ContentParticle>, Occurrence),
    Choice(Vec<ContentParticle>, Occurrence),
}

impl std::fmt::Display for ContentParticle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (items, sep, occurrence) = match self {
            Self::Name(name, occurrence) => return write!(f, "{name}{occurrence}"),
            Self::Sequence(items, occurrence) => (items, ",", occurrence),
            Self::Choice(items, occurrence) => (items, "|", occurrence),
        };
        write!(f, "(")?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(f, "{sep}")?;
            }
            write!(f, "{item}")?;
        }
        write!(f, "){occurrence}")
    }
}

#[derive(Debug, Clone)]
pub enum ContentSpec {
    EMPTY,
    ANY,
    /// `(#PCDATA | a | b)*`. The set holds the allowed element names.
    Mixed(Arc<HashSet<Arc<str>>>),
    Children(ElementContent),
}

impl ContentSpec {
    pub fn new_validator(&self) -> ContentSpecValidator {
        let state = match self {
            ContentSpec::EMPTY => ValidatorState::Empty,
            ContentSpec::ANY => ValidatorState::Any,
            ContentSpec::Mixed(set) => ValidatorState::Mixed(set.clone()),
            ContentSpec::Children(content) => ValidatorState::Children {
                states: vec![0],
                automaton: content.automaton().clone(),
            },
        };
        ContentSpecValidator {
            state,
            text_rejected: false,
        }
    }

    /// Whether only child elements (and ignorable whitespace) may appear.
    pub fn is_element_only(&self) -> bool {
        matches!(self, ContentSpec::Children(_) | ContentSpec::EMPTY)
    }
}

impl std::fmt::Display for ContentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EMPTY => write!(f, "EMPTY"),
            Self::ANY => write!(f, "ANY"),
            Self::Mixed(names) if names.is_empty() => write!(f, "(#PCDATA)"),
            Self::Mixed(names) => {
                let mut names = names.iter().collect::<Vec<_>>();
                names.sort();
                write!(f, "(#PCDATA")?;
                for name in names {
                    write!(f, "|{name}")?;
                }
                write!(f, ")*")
            }
            Self::Children(content) => write!(f, "{}", content.particle),
        }
    }
}

/// The Glushkov automaton of a content model.
///
/// State 0 is the initial state and state `p + 1` stands for name occurrence `p` of the
/// model, so the automaton has one state per name in the model plus one. A deterministic
/// model has at most one target per name from every state. Other models are simulated
/// over sets of states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentAutomaton {
    transitions: Vec<HashMap<Arc<str>, Vec<usize>>>,
    accepting: Vec<bool>,
}

impl ContentAutomaton {
    fn build(particle: &ContentParticle) -> Self {
        let mut positions = Positions::default();
        let root = positions.analyze(particle);

        let states = positions.symbols.len() + 1;
        let mut transitions = vec![HashMap::<Arc<str>, Vec<usize>>::new(); states];
        let mut accepting = vec![false; states];
        accepting[0] = root.nullable;
        for &q in &root.first {
            transitions[0]
                .entry(positions.symbols[q].clone())
                .or_default()
                .push(q + 1);
        }
        for (p, follow) in positions.follow.iter().enumerate() {
            for &q in follow {
                transitions[p + 1]
                    .entry(positions.symbols[q].clone())
                    .or_default()
                    .push(q + 1);
            }
            accepting[p + 1] = root.last.contains(&p);
        }
        Self {
            transitions,
            accepting,
        }
    }

    /// The states reached from `states` by a child named `name`.
    pub fn step(&self, states: &[usize], name: &str) -> Vec<usize> {
        let mut next = states
            .iter()
            .filter_map(|&state| self.transitions.get(state)?.get(name))
            .flatten()
            .copied()
            .collect::<Vec<_>>();
        next.sort_unstable();
        next.dedup();
        next
    }

    pub fn is_accepting(&self, states: &[usize]) -> bool {
        states
            .iter()
            .any(|&state| self.accepting.get(state).copied().unwrap_or(false))
    }

    pub fn num_states(&self) -> usize {
        self.accepting.len()
    }

    /// Whether every state has at most one target per name.
    pub fn is_deterministic(&self) -> bool {
        self.transitions
            .iter()
            .all(|targets| targets.values().all(|to| to.len() == 1))
    }

    /// Names that may follow in `states`, sorted.
    pub fn expected(&self, states: &[usize]) -> Vec<Arc<str>> {
        let mut names = states
            .iter()
            .filter_map(|&state| self.transitions.get(state))
            .flat_map(|targets| targets.keys().cloned())
            .collect::<Vec<_>>();
        names.sort();
        names.dedup();
        names
    }
}

/// A children content model. The automaton is built the first time it is needed.
#[derive(Debug, Clone)]
pub struct ElementContent {
    particle: ContentParticle,
    automaton: Arc<OnceLock<Arc<ContentAutomaton>>>,
}

impl ElementContent {
    pub fn new(particle: ContentParticle) -> Self {
        Self {
            particle,
            automaton: Arc::default(),
        }
    }

    pub fn particle(&self) -> &ContentParticle {
        &self.particle
    }

    pub fn automaton(&self) -> &Arc<ContentAutomaton> {
        self.automaton
            .get_or_init(|| Arc::new(ContentAutomaton::build(&self.particle)))
    }

    /// Whether the model satisfies the "deterministic content model" rule of XML 1.0.
    ///
    /// Non-deterministic models still validate correctly.
    pub fn is_deterministic(&self) -> bool {
        self.automaton().is_deterministic()
    }
}

/// `nullable`, `first` and `last` of a subexpression.
#[derive(Debug, Default)]
struct Summary {
    nullable: bool,
    first: BTreeSet<usize>,
    last: BTreeSet<usize>,
}

/// Each name occurrence in the model is a position, and `follow[p]` lists the positions
/// that may come right after `p`.
#[derive(Debug, Default)]
struct Positions {
    symbols: Vec<Arc<str>>,
    follow: Vec<BTreeSet<usize>>,
}

impl Positions {
    fn analyze(&mut self, particle: &ContentParticle) -> Summary {
        let (mut summary, occurrence) = match particle {
            ContentParticle::Name(name, occurrence) => {
                let pos = self.symbols.len();
                self.symbols.push(name.clone());
                self.follow.push(BTreeSet::new());
                let summary = Summary {
                    nullable: false,
                    first: BTreeSet::from([pos]),
                    last: BTreeSet::from([pos]),
                };
                (summary, *occurrence)
            }
            ContentParticle::Sequence(items, occurrence) => {
                let mut summary = Summary {
                    nullable: true,
                    ..Default::default()
                };
                for item in items {
                    let item = self.analyze(item);
                    for &p in &summary.last {
                        self.follow[p].extend(item.first.iter().copied());
                    }
                    if summary.nullable {
                        summary.first.extend(item.first.iter().copied());
                    }
                    if item.nullable {
                        summary.last.extend(item.last);
                    } else {
                        summary.last = item.last;
                    }
                    summary.nullable &= item.nullable;
                }
                (summary, *occurrence)
            }
            ContentParticle::Choice(items, occurrence) => {
                let mut summary = Summary::default();
                for item in items {
                    let item = self.analyze(item);
                    summary.nullable |= item.nullable;
                    summary.first.extend(item.first);
                    summary.last.extend(item.last);
                }
                (summary, *occurrence)
            }
        };
        match occurrence {
            Occurrence::Once => {}
            Occurrence::ZeroOrOne => summary.nullable = true,
            Occurrence::ZeroOrMore | Occurrence::OneOrMore => {
                for &p in &summary.last {
                    self.follow[p].extend(summary.first.iter().copied());
                }
                if occurrence == Occurrence::ZeroOrMore {
                    summary.nullable = true;
                }
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSpecValidationError {
    UnacceptableElement,
    UnacceptablePCDATA,
    NotReachedAcceptedState,
}

#[derive(Debug, Clone)]
enum ValidatorState {
    Empty,
    Any,
    Mixed(Arc<HashSet<Arc<str>>>),
    Children {
        states: Vec<usize>,
        automaton: Arc<ContentAutomaton>,
    },
}

/// Tracks the children of one open element.
///
/// A rejected child element is skipped, and checking goes on from the state before it.
/// Character data and markup are rejected only once per element.
#[derive(Debug, Clone)]
pub struct ContentSpecValidator {
    state: ValidatorState,
    text_rejected: bool,
}

impl ContentSpecValidator {
    pub fn push_name(&mut self, name: &str) -> Result<(), ContentSpecValidationError> {
        match &mut self.state {
            ValidatorState::Empty => Err(ContentSpecValidationError::UnacceptableElement),
            ValidatorState::Any => Ok(()),
            ValidatorState::Mixed(allowed) if allowed.contains(name) => Ok(()),
            ValidatorState::Mixed(_) => Err(ContentSpecValidationError::UnacceptableElement),
            ValidatorState::Children { states, automaton } => {
                let next = automaton.step(states, name);
                if next.is_empty() {
                    return Err(ContentSpecValidationError::UnacceptableElement);
                }
                *states = next;
                Ok(())
            }
        }
    }

    /// Character data. Whitespace is allowed in element-only content.
    pub fn push_pcdata(&mut self, whitespace: bool) -> Result<(), ContentSpecValidationError> {
        let allowed = match &self.state {
            ValidatorState::Any | ValidatorState::Mixed(_) => true,
            ValidatorState::Children { .. } => whitespace,
            ValidatorState::Empty => false,
        };
        self.reject_text_once(allowed)
    }

    /// Comments, processing instructions and entity references.
    /// Only elements declared `EMPTY` reject them.
    pub fn push_misc(&mut self) -> Result<(), ContentSpecValidationError> {
        let allowed = !matches!(self.state, ValidatorState::Empty);
        self.reject_text_once(allowed)
    }

    fn reject_text_once(&mut self, allowed: bool) -> Result<(), ContentSpecValidationError> {
        if allowed || self.text_rejected {
            return Ok(());
        }
        self.text_rejected = true;
        Err(ContentSpecValidationError::UnacceptablePCDATA)
    }

    pub fn finish(&self) -> Result<(), ContentSpecValidationError> {
        match &self.state {
            ValidatorState::Children { states, automaton } if !automaton.is_accepting(states) => {
                Err(ContentSpecValidationError::NotReachedAcceptedState)
            }
            _ => Ok(()),
        }
    }

    /// Names acceptable as the next child, for error messages.
    pub fn expected(&self) -> Vec<Arc<str>> {
        match &self.state {
            ValidatorState::Children { states, automaton } => automaton.expected(states),
            ValidatorState::Mixed(names) => {
                let mut names = names.iter().cloned().collect::<Vec<_>>();
                names.sort();
                names
            }
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str, occurrence: Occurrence) -> ContentParticle {
        ContentParticle::Name(n.into(), occurrence)
    }

    fn accepts(content: &ElementContent, children: &[&str]) -> bool {
        let mut validator = ContentSpec::Children(content.clone()).new_validator();
        children.iter().all(|c| validator.push_name(c).is_ok()) && validator.finish().is_ok()
    }

    #[test]
    fn sequence_with_repetition() {
        // (a, b*, c?)
        let content = ElementContent::new(ContentParticle::Sequence(
            vec![
                name("a", Occurrence::Once),
                name("b", Occurrence::ZeroOrMore),
                name("c", Occurrence::ZeroOrOne),
            ],
            Occurrence::Once,
        ));
        assert!(content.is_deterministic());
        assert_eq!(content.particle().to_string(), "(a,b*,c?)");
        assert!(accepts(&content, &["a"]));
        assert!(accepts(&content, &["a", "b", "b", "c"]));
        assert!(accepts(&content, &["a", "c"]));
        assert!(!accepts(&content, &[]));
        assert!(!accepts(&content, &["b"]));
        assert!(!accepts(&content, &["a", "c", "c"]));
        assert!(!accepts(&content, &["a", "c", "b"]));
    }

    #[test]
    fn nested_choice_plus() {
        // (head, (p | list)+)
        let content = ElementContent::new(ContentParticle::Sequence(
            vec![
                name("head", Occurrence::Once),
                ContentParticle::Choice(
                    vec![name("p", Occurrence::Once), name("list", Occurrence::Once)],
                    Occurrence::OneOrMore,
                ),
            ],
            Occurrence::Once,
        ));
        assert!(accepts(&content, &["head", "p"]));
        assert!(accepts(&content, &["head", "list", "p", "list"]));
        assert!(!accepts(&content, &["head"]));
        assert!(!accepts(&content, &["p", "head"]));
    }

    #[test]
    fn ambiguous_model_still_validates() {
        // ((a, b) | (a, c))
        let content = ElementContent::new(ContentParticle::Choice(
            vec![
                ContentParticle::Sequence(
                    vec![name("a", Occurrence::Once), name("b", Occurrence::Once)],
                    Occurrence::Once,
                ),
                ContentParticle::Sequence(
                    vec![name("a", Occurrence::Once), name("c", Occurrence::Once)],
                    Occurrence::Once,
                ),
            ],
            Occurrence::Once,
        ));
        assert!(!content.is_deterministic());
        assert!(accepts(&content, &["a", "b"]));
        assert!(accepts(&content, &["a", "c"]));
        assert!(!accepts(&content, &["a"]));
        assert!(!accepts(&content, &["a", "b", "c"]));
    }

    #[test]
    fn rejected_child_is_skipped() {
        // (a, b)
        let content = ElementContent::new(ContentParticle::Sequence(
            vec![name("a", Occurrence::Once), name("b", Occurrence::Once)],
            Occurrence::Once,
        ));
        let mut validator = ContentSpec::Children(content).new_validator();
        assert_eq!(
            validator.push_name("x"),
            Err(ContentSpecValidationError::UnacceptableElement)
        );
        assert!(validator.push_name("a").is_ok());
        assert_eq!(validator.expected(), [Arc::<str>::from("b")]);
        assert_eq!(
            validator.finish(),
            Err(ContentSpecValidationError::NotReachedAcceptedState)
        );
        assert!(validator.push_name("b").is_ok());
        assert!(validator.finish().is_ok());
    }

    #[test]
    fn automaton_grows_with_the_model() {
        // ((a | b)*, a, (a | b), (a | b), ...): the language needs exponentially many
        // deterministic states, the position automaton one per name.
        let either = || {
            ContentParticle::Choice(
                vec![name("a", Occurrence::Once), name("b", Occurrence::Once)],
                Occurrence::Once,
            )
        };
        let mut items = vec![
            ContentParticle::Choice(
                vec![name("a", Occurrence::Once), name("b", Occurrence::Once)],
                Occurrence::ZeroOrMore,
            ),
            name("a", Occurrence::Once),
        ];
        items.extend(std::iter::repeat_with(either).take(24));
        let content = ElementContent::new(ContentParticle::Sequence(items, Occurrence::Once));
        assert!(!content.is_deterministic());
        assert_eq!(content.automaton().num_states(), 2 + 1 + 2 * 24 + 1);

        let mut children = vec!["b"; 30];
        children.push("a");
        children.extend(["b"; 24]);
        assert!(accepts(&content, &children));
        // the 25th child from the end must be `a`
        children[30] = "b";
        assert!(!accepts(&content, &children));
    }

    #[test]
    fn pcdata_rules() {
        let mixed = ContentSpec::Mixed(Arc::new(HashSet::from(["em".into()])));
        let mut validator = mixed.new_validator();
        assert!(validator.push_pcdata(false).is_ok());
        assert!(validator.push_name("em").is_ok());
        assert!(validator.push_name("b").is_err());
        assert_eq!(mixed.to_string(), "(#PCDATA|em)*");

        let mut empty = ContentSpec::EMPTY.new_validator();
        assert!(empty.push_pcdata(true).is_err());
        // rejected once per element
        assert!(empty.push_misc().is_ok());
        let mut empty = ContentSpec::EMPTY.new_validator();
        assert!(empty.push_misc().is_err());

        let content = ElementContent::new(name("a", Occurrence::ZeroOrMore));
        let mut children = ContentSpec::Children(content).new_validator();
        assert!(children.push_pcdata(true).is_ok());
        assert!(children.push_pcdata(false).is_err());
    }
}
