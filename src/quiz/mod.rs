pub mod opentdb;

use rand::Rng;
use thiserror::Error;

/// One multiple-choice question. All texts are stored already decoded
/// (the Open Trivia DB serves them HTML-entity-encoded, see `opentdb`),
/// so answer comparison is plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub prompt: String,
    pub correct_answer: String,
    pub incorrect_answers: Vec<String>,
}

impl Question {
    pub fn new(prompt: String, correct_answer: String, incorrect_answers: Vec<String>) -> Self {
        Self {
            prompt,
            correct_answer,
            incorrect_answers,
        }
    }

    /// Number of buttons shown for this question (incorrect answers + the correct one).
    pub fn choice_count(&self) -> usize {
        self.incorrect_answers.len() + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    AwaitingAnswer,
    ShowingResult,
    Complete,
}

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("a quiz needs at least one question")]
    EmptyQuiz,
    #[error("{operation} is not allowed while the session is in {phase:?}")]
    InvalidStateTransition {
        operation: &'static str,
        phase: Phase,
    },
    #[error("advance token does not belong to the live session")]
    StaleAdvance,
}

/// One-shot permission to move past the result-display window. Bound to the
/// session and the question it was issued for, so a token that outlives its
/// session (the display timer fired after a reset) is rejected instead of
/// mutating whatever session happens to be live by then.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdvanceToken {
    session_id: u64,
    question_index: usize,
}

/// What `submit_answer` tells the caller: whether the guess was right, and the
/// token the caller must hand back via `advance` once the result has been shown.
#[derive(Debug, Clone, Copy)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub token: AdvanceToken,
}

/// One play-through: a fixed question list, the player's position and tallies,
/// and the phase of the screen flow. Created after a successful fetch (there is
/// no Loading variant here; a session that exists is already loaded) and
/// discarded wholesale on reset.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    session_id: u64,
    questions: Vec<Question>,
    current_index: usize,
    score: u32,
    incorrect_count: u32,
    phase: Phase,
    answer_slot: usize,
}

impl QuizSession {
    pub fn new(questions: Vec<Question>) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::EmptyQuiz);
        }
        let answer_slot = draw_answer_slot(&questions[0]);
        Ok(Self {
            session_id: rand::thread_rng().gen(),
            questions,
            current_index: 0,
            score: 0,
            incorrect_count: 0,
            phase: Phase::AwaitingAnswer,
            answer_slot,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn incorrect_count(&self) -> u32 {
        self.incorrect_count
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    /// The question the player is currently looking at. `None` once the
    /// session is complete.
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    pub fn answer_slot(&self) -> usize {
        self.answer_slot
    }

    /// Answer texts in display order: the incorrect answers with the correct
    /// one inserted at the randomized slot.
    pub fn choices(&self) -> Vec<&str> {
        let Some(question) = self.current_question() else {
            return Vec::new();
        };
        let mut choices: Vec<&str> = question
            .incorrect_answers
            .iter()
            .map(String::as_str)
            .collect();
        choices.insert(self.answer_slot, question.correct_answer.as_str());
        choices
    }

    /// Score the player's choice against the current question. Only legal
    /// while awaiting an answer; a second submission inside the result-display
    /// window is rejected rather than double-counted.
    pub fn submit_answer(&mut self, choice: &str) -> Result<AnswerOutcome, QuizError> {
        if self.phase != Phase::AwaitingAnswer {
            return Err(QuizError::InvalidStateTransition {
                operation: "submit_answer",
                phase: self.phase,
            });
        }
        // AwaitingAnswer implies current_index is in bounds
        let question = &self.questions[self.current_index];
        let is_correct = choice == question.correct_answer;
        if is_correct {
            self.score += 1;
        } else {
            self.incorrect_count += 1;
        }
        self.phase = Phase::ShowingResult;
        Ok(AnswerOutcome {
            is_correct,
            token: AdvanceToken {
                session_id: self.session_id,
                question_index: self.current_index,
            },
        })
    }

    /// Move past the result-display window: advance to the next question (with
    /// a freshly drawn answer slot) or finish the quiz. The token must match
    /// the live session and the question it was issued for.
    pub fn advance(&mut self, token: AdvanceToken) -> Result<Phase, QuizError> {
        if token.session_id != self.session_id || token.question_index != self.current_index {
            return Err(QuizError::StaleAdvance);
        }
        if self.phase != Phase::ShowingResult {
            return Err(QuizError::InvalidStateTransition {
                operation: "advance",
                phase: self.phase,
            });
        }
        self.current_index += 1;
        match self.questions.get(self.current_index) {
            Some(question) => {
                self.answer_slot = draw_answer_slot(question);
                self.phase = Phase::AwaitingAnswer;
            }
            None => self.phase = Phase::Complete,
        }
        Ok(self.phase)
    }

    /// Share of correct answers, rounded to a whole percent of the full quiz
    /// length. `new` rejects empty quizzes, so the division is always defined.
    pub fn score_percentage(&self) -> u32 {
        (self.score as f64 / self.questions.len() as f64 * 100.0).round() as u32
    }
}

fn draw_answer_slot(question: &Question) -> usize {
    rand::thread_rng().gen_range(0..question.choice_count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_questions(amount: usize) -> Vec<Question> {
        (0..amount)
            .map(|i| {
                Question::new(
                    format!("Question {}?", i),
                    format!("right {}", i),
                    vec![
                        format!("wrong {}a", i),
                        format!("wrong {}b", i),
                        format!("wrong {}c", i),
                    ],
                )
            })
            .collect()
    }

    fn answer_and_advance(session: &mut QuizSession, choice: &str) -> Phase {
        let outcome = session.submit_answer(choice).unwrap();
        session.advance(outcome.token).unwrap()
    }

    #[test]
    fn rejects_empty_quiz() {
        assert!(matches!(
            QuizSession::new(Vec::new()),
            Err(QuizError::EmptyQuiz)
        ));
    }

    #[test]
    fn tallies_match_index_after_every_answer() {
        let mut session = QuizSession::new(sample_questions(10)).unwrap();
        for i in 0..10 {
            // Alternate correct and incorrect answers
            let choice = if i % 2 == 0 {
                format!("right {}", i)
            } else {
                "definitely not it".to_string()
            };
            answer_and_advance(&mut session, &choice);
            assert_eq!(
                session.score() + session.incorrect_count(),
                session.current_index() as u32
            );
            assert!(session.current_index() <= session.total_questions());
        }
        assert_eq!(session.phase(), Phase::Complete);
        assert_eq!(session.current_index(), session.total_questions());
        assert_eq!(session.score(), 5);
        assert_eq!(session.incorrect_count(), 5);
    }

    #[test]
    fn complete_only_at_the_last_index() {
        let mut session = QuizSession::new(sample_questions(3)).unwrap();
        assert_eq!(
            answer_and_advance(&mut session, "right 0"),
            Phase::AwaitingAnswer
        );
        assert_eq!(
            answer_and_advance(&mut session, "right 1"),
            Phase::AwaitingAnswer
        );
        assert_eq!(
            answer_and_advance(&mut session, "right 2"),
            Phase::Complete
        );
        assert!(session.current_question().is_none());
    }

    #[test]
    fn double_submission_scores_once() {
        let mut session = QuizSession::new(sample_questions(10)).unwrap();
        let outcome = session.submit_answer("right 0").unwrap();
        assert!(outcome.is_correct);
        // Second tap lands before the display delay has advanced the session
        assert!(matches!(
            session.submit_answer("right 0"),
            Err(QuizError::InvalidStateTransition { .. })
        ));
        assert_eq!(session.score(), 1);
        session.advance(outcome.token).unwrap();
        assert_eq!(session.score(), 1);
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn submit_after_completion_is_rejected() {
        let mut session = QuizSession::new(sample_questions(1)).unwrap();
        answer_and_advance(&mut session, "right 0");
        assert!(matches!(
            session.submit_answer("right 0"),
            Err(QuizError::InvalidStateTransition {
                phase: Phase::Complete,
                ..
            })
        ));
    }

    #[test]
    fn stale_token_does_not_touch_a_fresh_session() {
        let mut old_session = QuizSession::new(sample_questions(5)).unwrap();
        let outcome = old_session.submit_answer("right 0").unwrap();

        // Reset during the display window: the old session is discarded and a
        // new one takes its place before the timer fires.
        let mut new_session = QuizSession::new(sample_questions(5)).unwrap();
        assert!(matches!(
            new_session.advance(outcome.token),
            Err(QuizError::StaleAdvance)
        ));
        assert_eq!(new_session.current_index(), 0);
        assert_eq!(new_session.phase(), Phase::AwaitingAnswer);
    }

    #[test]
    fn token_is_consumed_by_its_own_advance() {
        let mut session = QuizSession::new(sample_questions(5)).unwrap();
        let first = session.submit_answer("right 0").unwrap();
        session.advance(first.token).unwrap();
        // Replaying the same token against the advanced session does nothing
        assert!(matches!(
            session.advance(first.token),
            Err(QuizError::StaleAdvance)
        ));
        assert_eq!(session.current_index(), 1);
    }

    #[test]
    fn correct_answer_sits_at_the_drawn_slot() {
        let session = QuizSession::new(sample_questions(1)).unwrap();
        let choices = session.choices();
        assert_eq!(choices.len(), 4);
        assert_eq!(choices[session.answer_slot()], "right 0");
    }

    #[test]
    fn answer_slot_is_uniform_over_fresh_draws() {
        const DRAWS: usize = 10_000;
        const SLOTS: usize = 4;
        let mut counts = [0usize; SLOTS];
        for _ in 0..DRAWS {
            let session = QuizSession::new(sample_questions(1)).unwrap();
            counts[session.answer_slot()] += 1;
        }
        // Chi-square with 3 degrees of freedom; 16.27 is the p = 0.001 cutoff
        let expected = DRAWS as f64 / SLOTS as f64;
        let chi_square: f64 = counts
            .iter()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();
        assert!(
            chi_square < 16.27,
            "answer slot distribution looks biased: {:?} (chi-square {:.2})",
            counts,
            chi_square
        );
    }

    #[test]
    fn slot_is_redrawn_for_every_question() {
        // With 50 questions and 4 slots, every slot matching the first is a
        // 4^-49 event, so a constant sequence means the redraw is missing.
        let mut session = QuizSession::new(sample_questions(50)).unwrap();
        let mut slots = vec![session.answer_slot()];
        while session.phase() != Phase::Complete {
            let index = session.current_index();
            answer_and_advance(&mut session, &format!("right {}", index));
            if session.phase() == Phase::AwaitingAnswer {
                slots.push(session.answer_slot());
            }
        }
        assert_eq!(slots.len(), 50);
        assert!(slots.iter().any(|&slot| slot != slots[0]));
    }

    #[test]
    fn score_percentage_rounds_to_whole_percent() {
        let mut session = QuizSession::new(sample_questions(10)).unwrap();
        for i in 0..7 {
            answer_and_advance(&mut session, &format!("right {}", i));
        }
        for _ in 7..10 {
            answer_and_advance(&mut session, "nope");
        }
        assert_eq!(session.score(), 7);
        assert_eq!(session.score_percentage(), 70);

        let mut thirds = QuizSession::new(sample_questions(3)).unwrap();
        answer_and_advance(&mut thirds, "right 0");
        answer_and_advance(&mut thirds, "nope");
        answer_and_advance(&mut thirds, "nope");
        assert_eq!(thirds.score_percentage(), 33);
    }
}
