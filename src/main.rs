mod quiz;

use std::{sync::Arc, time::Duration};

use dotenv::dotenv;
use quiz::opentdb::{Category, Difficulty, TriviaApi};
use quiz::{Phase, QuizError, QuizSession};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatId, KeyboardButton, KeyboardMarkup},
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// How long the correct/incorrect feedback stays on screen before the next
/// question appears.
const RESULT_DISPLAY_DELAY: Duration = Duration::from_millis(1000);

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveCategory,
    ReceiveDifficulty {
        category: Category,
    },
    ReceiveAmount {
        category: Category,
        difficulty: Difficulty,
    },
    InQuiz {
        session: QuizSession,
    },
}

type QuizStorage = std::sync::Arc<ErasedStorage<State>>;

#[tokio::main]
async fn main() {
    dotenv().expect("Failed to load .env file");

    pretty_env_logger::init();
    log::info!("Starting trivia bot...");

    let bot = Bot::from_env();

    println!("Establishing connection to the database...");
    let storage: QuizStorage = SqliteStorage::open("db.sqlite", Json)
        .await
        .unwrap()
        .erase();
    println!("Connection established");

    let api = Arc::new(TriviaApi::from_env());

    // Load the category list once; every selection keyboard is built from it
    println!("Loading trivia categories...");
    let categories = Arc::new(
        api.fetch_categories()
            .await
            .expect("Failed to load trivia categories"),
    );
    println!("{} categories loaded", categories.len());

    let categories_for_start = categories.clone();
    let categories_for_restart = categories.clone();
    let categories_for_choice = categories.clone();
    let categories_for_amount = categories.clone();
    let categories_for_quiz = categories.clone();

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(
                move |bot: Bot, dialogue: QuizDialogue, msg: Message| {
                    start(categories_for_start.clone(), bot, dialogue, msg)
                },
            ))
            // "/start" discards whatever is going on, including a running quiz
            .branch(
                dptree::filter(|msg: Message| msg.text() == Some("/start")).endpoint(
                    move |bot: Bot, dialogue: QuizDialogue, msg: Message| {
                        restart(categories_for_restart.clone(), bot, dialogue, msg)
                    },
                ),
            )
            .branch(dptree::case![State::ReceiveCategory].endpoint(
                move |bot: Bot, dialogue: QuizDialogue, msg: Message| {
                    receive_category(categories_for_choice.clone(), bot, dialogue, msg)
                },
            ))
            .branch(
                dptree::case![State::ReceiveDifficulty { category }].endpoint(receive_difficulty),
            )
            .branch(
                dptree::case![State::ReceiveAmount {
                    category,
                    difficulty
                }]
                .endpoint(
                    move |bot: Bot,
                          dialogue: QuizDialogue,
                          (category, difficulty): (Category, Difficulty),
                          msg: Message| {
                        receive_amount(
                            api.clone(),
                            categories_for_amount.clone(),
                            bot,
                            dialogue,
                            (category, difficulty),
                            msg,
                        )
                    },
                ),
            )
            .branch(dptree::case![State::InQuiz { session }].endpoint(
                move |bot: Bot, dialogue: QuizDialogue, session: QuizSession, msg: Message| {
                    in_quiz(categories_for_quiz.clone(), bot, dialogue, session, msg)
                },
            )),
    )
    .dependencies(dptree::deps![storage])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;
}

const GREETING_TEXT: &str =
    "Hi! I'm a trivia bot. I'll quiz you one question at a time and keep score. Pick a category to begin!";
async fn start(
    categories: Arc<Vec<Category>>,
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT)
        .reply_markup(category_keyboard(&categories))
        .await?;

    dialogue.update(State::ReceiveCategory).await?;
    Ok(())
}

async fn restart(
    categories: Arc<Vec<Category>>,
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
) -> HandlerResult {
    bot.send_message(msg.chat.id, "Starting over! Pick a category")
        .reply_markup(category_keyboard(&categories))
        .await?;

    // Replacing the state discards any running session; a pending advance
    // for it will come up stale and be dropped
    dialogue.update(State::ReceiveCategory).await?;
    Ok(())
}

async fn receive_category(
    categories: Arc<Vec<Category>>,
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
) -> HandlerResult {
    let chosen = msg
        .text()
        .and_then(|text| categories.iter().find(|category| category.name == text));
    let Some(category) = chosen else {
        bot.send_message(msg.chat.id, "Please pick a category from the keyboard")
            .reply_markup(category_keyboard(&categories))
            .await?;
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(vec![Difficulty::ALL
        .iter()
        .map(|difficulty| KeyboardButton::new(difficulty.label()))
        .collect::<Vec<_>>()]);
    bot.send_message(
        msg.chat.id,
        format!("{} it is! How hard should it be?", category.name),
    )
    .reply_markup(keyboard)
    .await?;

    dialogue
        .update(State::ReceiveDifficulty {
            category: category.clone(),
        })
        .await?;
    Ok(())
}

async fn receive_difficulty(
    bot: Bot,
    dialogue: QuizDialogue,
    category: Category,
    msg: Message,
) -> HandlerResult {
    let Some(difficulty) = msg.text().and_then(Difficulty::from_label) else {
        bot.send_message(msg.chat.id, "Please pick a difficulty from the keyboard")
            .await?;
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new("5")],
        vec![KeyboardButton::new("10")],
        vec![KeyboardButton::new("15")],
    ]);
    bot.send_message(msg.chat.id, "How many questions?")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveAmount {
            category,
            difficulty,
        })
        .await?;
    Ok(())
}

async fn receive_amount(
    api: Arc<TriviaApi>,
    categories: Arc<Vec<Category>>,
    bot: Bot,
    dialogue: QuizDialogue,
    (category, difficulty): (Category, Difficulty),
    msg: Message,
) -> HandlerResult {
    let Some(amount) = msg.text().and_then(|text| text.parse::<usize>().ok()) else {
        bot.send_message(msg.chat.id, "Please enter a number")
            .await?;
        return Ok(());
    };
    if amount == 0 {
        bot.send_message(msg.chat.id, "The amount of questions can't be 0")
            .await?;
        return Ok(());
    }
    if amount > 50 {
        bot.send_message(msg.chat.id, "The trivia API serves at most 50 questions at once")
            .await?;
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        format!("Fetching {} {} questions...", amount, difficulty.label()),
    )
    .await?;

    let questions = match api.fetch_questions(category.id, difficulty, amount).await {
        Ok(questions) => questions,
        Err(err) => {
            log::warn!("Question fetch failed: {}", err);
            bot.send_message(
                msg.chat.id,
                "I couldn't fetch any questions right now. Pick a category to try again",
            )
            .reply_markup(category_keyboard(&categories))
            .await?;
            dialogue.update(State::ReceiveCategory).await?;
            return Ok(());
        }
    };

    let session = QuizSession::new(questions)?;
    send_question(&bot, msg.chat.id, &session).await?;

    dialogue.update(State::InQuiz { session }).await?;
    Ok(())
}

async fn in_quiz(
    categories: Arc<Vec<Category>>,
    bot: Bot,
    dialogue: QuizDialogue,
    session: QuizSession,
    msg: Message,
) -> HandlerResult {
    let Some(answer) = msg.text() else {
        bot.send_message(msg.chat.id, "Please use the answer buttons")
            .await?;
        return Ok(());
    };

    let mut session = session;
    let outcome = match session.submit_answer(answer) {
        Ok(outcome) => outcome,
        // A tap inside the result-display window (or after the quiz ended)
        // must not score again
        Err(err) => {
            log::debug!("Ignoring answer: {}", err);
            return Ok(());
        }
    };

    let feedback = {
        // Still pointing at the answered question while the result is shown
        let correct_answer = session
            .current_question()
            .map(|question| question.correct_answer.clone())
            .unwrap_or_default();
        let verdict = if outcome.is_correct {
            "✅ Correct!".to_string()
        } else {
            format!("❌ Wrong! The right answer was {}.", correct_answer)
        };
        format!(
            "{}\nCorrect: {} · Incorrect: {}",
            verdict,
            session.score(),
            session.incorrect_count()
        )
    };
    bot.send_message(msg.chat.id, feedback).await?;

    // Persist the ShowingResult phase before the delay so another tap is
    // rejected by the session guard instead of being scored
    dialogue.update(State::InQuiz { session }).await?;

    let chat_id = msg.chat.id;
    tokio::spawn(async move {
        if let Err(err) =
            advance_after_delay(categories, bot, dialogue, chat_id, outcome.token).await
        {
            log::warn!("Deferred advance failed: {}", err);
        }
    });
    Ok(())
}

/// The one-shot timer behind the result-display window. Whatever happened to
/// the dialogue in the meantime wins: if the session was replaced or the quiz
/// abandoned, the token comes up stale and nothing is touched.
async fn advance_after_delay(
    categories: Arc<Vec<Category>>,
    bot: Bot,
    dialogue: QuizDialogue,
    chat_id: ChatId,
    token: quiz::AdvanceToken,
) -> HandlerResult {
    tokio::time::sleep(RESULT_DISPLAY_DELAY).await;

    let Some(State::InQuiz { mut session }) = dialogue.get().await? else {
        return Ok(());
    };

    match session.advance(token) {
        Ok(Phase::Complete) => {
            let summary = format!(
                "That's the end of the quiz! You answered {} of {} correctly — {}%.\nFancy another round? Pick a category!",
                session.score(),
                session.total_questions(),
                session.score_percentage()
            );
            dialogue.update(State::ReceiveCategory).await?;
            bot.send_message(chat_id, summary)
                .reply_markup(category_keyboard(&categories))
                .await?;
        }
        Ok(_) => {
            dialogue
                .update(State::InQuiz {
                    session: session.clone(),
                })
                .await?;
            send_question(&bot, chat_id, &session).await?;
        }
        Err(QuizError::StaleAdvance) => {
            log::debug!("Dropping advance for a discarded session");
        }
        Err(err) => log::warn!("Unexpected advance failure: {}", err),
    }
    Ok(())
}

async fn send_question(bot: &Bot, chat_id: ChatId, session: &QuizSession) -> HandlerResult {
    let Some(question) = session.current_question() else {
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(
        session
            .choices()
            .into_iter()
            .map(|choice| vec![KeyboardButton::new(choice.to_string())])
            .collect::<Vec<_>>(),
    );
    bot.send_message(
        chat_id,
        format!(
            "Question {} of {}:\n{}",
            session.current_index() + 1,
            session.total_questions(),
            question.prompt
        ),
    )
    .reply_markup(keyboard)
    .await?;
    Ok(())
}

fn category_keyboard(categories: &[Category]) -> KeyboardMarkup {
    KeyboardMarkup::new(
        categories
            .chunks(2)
            .map(|row| {
                row.iter()
                    .map(|category| KeyboardButton::new(category.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>(),
    )
}
