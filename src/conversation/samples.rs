//! Ready-made questions front-ends offer to get a conversation started.

use serde::Serialize;

/// A themed group of sample questions.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SampleCategory {
    /// Heading shown above the questions.
    pub title: &'static str,
    /// Questions in display order.
    pub questions: &'static [&'static str],
}

/// All sample questions, grouped by theme.
pub const SAMPLE_QUESTIONS: &[SampleCategory] = &[
    SampleCategory {
        title: "Core Java Security & Best Practices",
        questions: &[
            "How to implement secure password validation in Java?",
            "What are the best practices for exception handling in Java?",
            "How to prevent SQL injection in Java applications?",
            "How to implement proper input validation using Bean Validation?",
            "How to handle sensitive data securely in Java?",
            "What are the security considerations for Java collections?",
            "How to implement secure file handling in Java?",
        ],
    },
    SampleCategory {
        title: "Spring Boot Security & MVC",
        questions: &[
            "How to implement complete user authentication with proper MVC architecture?",
            "How to create secure REST APIs with input validation in Spring Boot?",
            "How to implement role-based authorization following MVC principles?",
            "How to secure database operations and prevent SQL injection in Spring Boot?",
            "How to implement proper exception handling across all MVC layers?",
            "How to create secure file upload functionality in Spring Boot?",
            "How to implement CORS security in Spring Boot applications?",
            "How to structure a Spring Boot application following MVC architecture?",
            "How to implement proper logging and monitoring in Spring Boot?",
            "How to create comprehensive unit tests for all MVC layers?",
        ],
    },
];

/// Every sample question, numbered across categories in display order.
#[must_use = "iterators are lazy"]
pub fn numbered_samples() -> impl Iterator<Item = (usize, &'static str)> {
    SAMPLE_QUESTIONS
        .iter()
        .flat_map(|category| category.questions.iter().copied())
        .enumerate()
        .map(|(i, question)| (i + 1, question))
}

/// The sample at 1-based position `n` of [`numbered_samples`].
#[must_use]
pub fn sample_question(n: usize) -> Option<&'static str> {
    n.checked_sub(1)
        .and_then(|i| numbered_samples().nth(i))
        .map(|(_, question)| question)
}
