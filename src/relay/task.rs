//! Task types and their system instructions
//!
//! The wire carries the task as a string such as `chatgpt-translate`.
//! It is resolved once into a [`TaskKind`] (and then a data-carrying
//! [`Task`]) at the session boundary; nothing downstream compares strings.

use crate::error::RelaywizError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of task kinds understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Translate into the target language (also the fallback)
    #[default]
    Translate,
    /// Explain the passage
    Explain,
    /// Summarize the passage
    Summarize,
    /// Improve clarity of the passage
    Rewrite,
    /// Correct grammar; language independent
    Grammar,
    /// Multi-turn chat
    Ask,
    /// Free-form prompt with optional tone
    Prompt,
    /// Solve quizzes recognized from a screen capture
    QuizSolver,
    /// Question about an image
    Vision,
    /// Read the passage aloud
    Read,
}

impl TaskKind {
    /// All kinds, in menu order
    pub const ALL: [TaskKind; 10] = [
        TaskKind::Translate,
        TaskKind::Explain,
        TaskKind::Summarize,
        TaskKind::Rewrite,
        TaskKind::Grammar,
        TaskKind::Ask,
        TaskKind::Prompt,
        TaskKind::QuizSolver,
        TaskKind::Vision,
        TaskKind::Read,
    ];

    /// Resolve a wire task name; unknown names resolve to `Translate`
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywiz::relay::TaskKind;
    ///
    /// assert_eq!(TaskKind::from_wire("chatgpt-grammar"), TaskKind::Grammar);
    /// assert_eq!(TaskKind::from_wire("chatgpt-dance"), TaskKind::Translate);
    /// ```
    pub fn from_wire(name: &str) -> Self {
        match name {
            "chatgpt-translate" => TaskKind::Translate,
            "chatgpt-explain" => TaskKind::Explain,
            "chatgpt-summarize" => TaskKind::Summarize,
            "chatgpt-rewrite" => TaskKind::Rewrite,
            "chatgpt-grammar" => TaskKind::Grammar,
            "chatgpt-ask" => TaskKind::Ask,
            "chatgpt-prompt" => TaskKind::Prompt,
            "chatgpt-quiz-solver" | "chatgpt-quiz-slover" => TaskKind::QuizSolver,
            "chatgpt-vision" => TaskKind::Vision,
            "chatgpt-read" => TaskKind::Read,
            other => {
                tracing::debug!("Unknown task type {:?}, falling back to translate", other);
                TaskKind::Translate
            }
        }
    }

    /// Canonical wire name
    pub fn wire_name(self) -> &'static str {
        match self {
            TaskKind::Translate => "chatgpt-translate",
            TaskKind::Explain => "chatgpt-explain",
            TaskKind::Summarize => "chatgpt-summarize",
            TaskKind::Rewrite => "chatgpt-rewrite",
            TaskKind::Grammar => "chatgpt-grammar",
            TaskKind::Ask => "chatgpt-ask",
            TaskKind::Prompt => "chatgpt-prompt",
            TaskKind::QuizSolver => "chatgpt-quiz-solver",
            TaskKind::Vision => "chatgpt-vision",
            TaskKind::Read => "chatgpt-read",
        }
    }

    /// Short name, e.g. `quiz_solver`
    pub fn short_name(self) -> &'static str {
        match self {
            TaskKind::Translate => "translate",
            TaskKind::Explain => "explain",
            TaskKind::Summarize => "summarize",
            TaskKind::Rewrite => "rewrite",
            TaskKind::Grammar => "grammar",
            TaskKind::Ask => "ask",
            TaskKind::Prompt => "prompt",
            TaskKind::QuizSolver => "quiz_solver",
            TaskKind::Vision => "vision",
            TaskKind::Read => "read",
        }
    }

    /// Whether the popup stays open after the answer completes
    pub fn is_chat(self) -> bool {
        matches!(
            self,
            TaskKind::Ask | TaskKind::Prompt | TaskKind::QuizSolver | TaskKind::Vision
        )
    }

    /// Whether opening this task waits for user input before a session
    pub fn awaits_input(self) -> bool {
        matches!(self, TaskKind::Ask | TaskKind::QuizSolver)
    }
}

/// Strict parse of a short (`quiz_solver`) or wire (`chatgpt-quiz-solver`) name
impl FromStr for TaskKind {
    type Err = RelaywizError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('-', "_");
        let name = name.strip_prefix("chatgpt_").unwrap_or(&name);
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.short_name() == name)
            .or_else(|| (name == "quiz_slover").then_some(TaskKind::QuizSolver))
            .ok_or_else(|| RelaywizError::Config(format!("Unknown task: {}", s)))
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A resolved task carrying the data it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Translate
    Translate,
    /// Explain
    Explain,
    /// Summarize
    Summarize,
    /// Rewrite
    Rewrite,
    /// Grammar correction
    Grammar,
    /// Chat continuing a stored conversation
    Ask {
        /// Conversation whose history is replayed
        conversation_id: String,
    },
    /// Free-form prompt
    Prompt {
        /// Optional tone such as "formal"
        tone: Option<String>,
    },
    /// Quiz solving
    QuizSolver,
    /// Question about an image
    Vision {
        /// Conversation whose history is replayed
        conversation_id: String,
        /// Data URL or remote URL of the image, if any
        image_url: Option<String>,
    },
    /// Text-to-speech
    Read,
}

impl Task {
    /// Build the task for `kind` from the request fields
    pub fn resolve(
        kind: TaskKind,
        conversation_id: &str,
        tone: Option<String>,
        image_url: Option<String>,
    ) -> Self {
        match kind {
            TaskKind::Translate => Task::Translate,
            TaskKind::Explain => Task::Explain,
            TaskKind::Summarize => Task::Summarize,
            TaskKind::Rewrite => Task::Rewrite,
            TaskKind::Grammar => Task::Grammar,
            TaskKind::Ask => Task::Ask {
                conversation_id: conversation_id.to_string(),
            },
            TaskKind::Prompt => Task::Prompt {
                tone: tone.filter(|t| !t.trim().is_empty()),
            },
            TaskKind::QuizSolver => Task::QuizSolver,
            TaskKind::Vision => Task::Vision {
                conversation_id: conversation_id.to_string(),
                image_url: image_url.filter(|u| !u.is_empty()),
            },
            TaskKind::Read => Task::Read,
        }
    }

    /// The kind this task was resolved from
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Translate => TaskKind::Translate,
            Task::Explain => TaskKind::Explain,
            Task::Summarize => TaskKind::Summarize,
            Task::Rewrite => TaskKind::Rewrite,
            Task::Grammar => TaskKind::Grammar,
            Task::Ask { .. } => TaskKind::Ask,
            Task::Prompt { .. } => TaskKind::Prompt,
            Task::QuizSolver => TaskKind::QuizSolver,
            Task::Vision { .. } => TaskKind::Vision,
            Task::Read => TaskKind::Read,
        }
    }

    /// Conversation whose stored turns are replayed before the new text
    pub fn history_id(&self) -> Option<&str> {
        match self {
            Task::Ask { conversation_id } | Task::Vision { conversation_id, .. } => {
                Some(conversation_id)
            }
            _ => None,
        }
    }

    /// System instruction for this task in `language`
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywiz::relay::Task;
    ///
    /// assert_eq!(
    ///     Task::Translate.system_prompt("vi"),
    ///     "Please translate the following words or sentences into vi"
    /// );
    /// ```
    pub fn system_prompt(&self, language: &str) -> String {
        match self {
            Task::Explain => format!(
                "You are an expert translator. Please explain the above text in {}",
                language
            ),
            Task::Summarize => format!(
                "You are a professional text summarizer, you can only summarize the text, \
                 don't interpret it, make it shorter as possible. Please summarize the text in {}",
                language
            ),
            Task::Rewrite => format!(
                "You are a language expert, Please enhance the text to improve its clarity, \
                 conciseness, and coherence in {}",
                language
            ),
            Task::Grammar => {
                "You will be given statements. Your task is to correct them to standard grammar"
                    .to_string()
            }
            Task::Ask { .. } | Task::Vision { .. } => "You are a helpful assistant".to_string(),
            Task::Prompt { tone: Some(tone) } => format!(
                "You are a helpful assistant. Please use tone: {} and language in \"{}\"",
                tone, language
            ),
            Task::Prompt { tone: None } => format!(
                "You are a helpful assistant. Please use language in \"{}\"",
                language
            ),
            Task::QuizSolver => format!(
                "You will be given one or more quizzes. Your task is to identify the correct \
                 answers then explain them in detail after the correct answers. Please use the \
                 language in \"{}\"",
                language
            ),
            Task::Translate | Task::Read => format!(
                "Please translate the following words or sentences into {}",
                language
            ),
        }
    }
}
