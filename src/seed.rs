//! Demo data for development databases.
//!
//! A [`SeedPlan`] is drawn from a random source first and written in one
//! transaction afterwards. Open loans of the plan are already taken out of
//! the copy counters, so a freshly seeded catalog passes the copy audit.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::{seq::index::sample, Rng};
use sqlx::{PgPool, Postgres, Transaction};

use crate::{error::AppResult, models::loan::LoanStatus};

const CATEGORIES: &[(&str, &str)] = &[
    ("Fiction", "Narrative prose literary works"),
    ("Non-Fiction", "Factual and informative books"),
    ("Science Fiction", "Speculative fiction with futuristic themes"),
    ("Fantasy", "Magic and supernatural elements"),
    ("Mystery", "Detective and crime stories"),
    ("Thriller", "Suspenseful and exciting narratives"),
    ("Romance", "Love stories and relationships"),
    ("Horror", "Scary and frightening tales"),
    ("Biography", "Life stories of real people"),
    ("History", "Historical events and periods"),
    ("Science", "Scientific knowledge and discoveries"),
    ("Technology", "Computing and technological advances"),
    ("Business", "Business and entrepreneurship"),
    ("Self-Help", "Personal development and improvement"),
    ("Philosophy", "Philosophical thoughts and theories"),
    ("Psychology", "Human behavior and mental processes"),
    ("Art", "Visual arts and creativity"),
    ("Poetry", "Poetic works and collections"),
    ("Drama", "Theatrical and dramatic works"),
    ("Children", "Books for young readers"),
];

/// (name, bio, birth date, nationality)
const AUTHORS: &[(&str, &str, &str, &str)] = &[
    ("William Shakespeare", "English playwright and poet", "1564-04-23", "English"),
    ("Jane Austen", "English novelist known for romantic fiction", "1775-12-16", "English"),
    ("Charles Dickens", "Victorian era novelist", "1812-02-07", "English"),
    ("Leo Tolstoy", "Russian author of War and Peace", "1828-09-09", "Russian"),
    ("Fyodor Dostoevsky", "Russian novelist and philosopher", "1821-11-11", "Russian"),
    ("Mark Twain", "American author and humorist", "1835-11-30", "American"),
    ("Virginia Woolf", "Modernist English writer", "1882-01-25", "English"),
    ("Gabriel García Márquez", "Colombian novelist, magical realism", "1927-03-06", "Colombian"),
    ("Toni Morrison", "American novelist, Nobel laureate", "1931-02-18", "American"),
    ("Haruki Murakami", "Japanese contemporary writer", "1949-01-12", "Japanese"),
    ("Margaret Atwood", "Canadian author and poet", "1939-11-18", "Canadian"),
    ("Kazuo Ishiguro", "British novelist", "1954-11-08", "British-Japanese"),
    ("J.R.R. Tolkien", "Author of The Lord of the Rings", "1892-01-03", "English"),
    ("George Orwell", "Author of 1984 and Animal Farm", "1903-06-25", "English"),
    ("Isaac Asimov", "Science fiction writer and biochemist", "1920-01-02", "American"),
    ("Ursula K. Le Guin", "Fantasy and science fiction author", "1929-10-21", "American"),
    ("Frank Herbert", "Author of Dune", "1920-10-08", "American"),
    ("Agatha Christie", "Queen of mystery novels", "1890-09-15", "English"),
    ("Arthur Conan Doyle", "Creator of Sherlock Holmes", "1859-05-22", "Scottish"),
    ("Mary Shelley", "Author of Frankenstein", "1797-08-30", "English"),
];

/// (title, author index, publication date, pages)
const TITLES: &[(&str, usize, &str, i32)] = &[
    ("Hamlet", 0, "1603-01-01", 342),
    ("Macbeth", 0, "1623-01-01", 249),
    ("Pride and Prejudice", 1, "1813-01-28", 432),
    ("Emma", 1, "1815-12-23", 474),
    ("Great Expectations", 2, "1861-08-01", 505),
    ("A Tale of Two Cities", 2, "1859-11-26", 489),
    ("War and Peace", 3, "1869-01-01", 1225),
    ("Anna Karenina", 3, "1878-01-01", 864),
    ("Crime and Punishment", 4, "1866-01-01", 671),
    ("The Brothers Karamazov", 4, "1880-11-01", 796),
    ("Adventures of Huckleberry Finn", 5, "1884-12-10", 366),
    ("Mrs Dalloway", 6, "1925-05-14", 194),
    ("To the Lighthouse", 6, "1927-05-05", 209),
    ("One Hundred Years of Solitude", 7, "1967-05-30", 417),
    ("Love in the Time of Cholera", 7, "1985-01-01", 348),
    ("Beloved", 8, "1987-09-02", 324),
    ("Norwegian Wood", 9, "1987-09-04", 296),
    ("Kafka on the Shore", 9, "2002-09-12", 505),
    ("The Handmaid's Tale", 10, "1985-01-01", 311),
    ("The Remains of the Day", 11, "1989-05-01", 258),
    ("Never Let Me Go", 11, "2005-03-03", 288),
    ("The Hobbit", 12, "1937-09-21", 310),
    ("The Fellowship of the Ring", 12, "1954-07-29", 423),
    ("Nineteen Eighty-Four", 13, "1949-06-08", 328),
    ("Animal Farm", 13, "1945-08-17", 112),
    ("Foundation", 14, "1951-06-01", 255),
    ("I, Robot", 14, "1950-12-02", 253),
    ("A Wizard of Earthsea", 15, "1968-01-01", 183),
    ("The Left Hand of Darkness", 15, "1969-03-01", 304),
    ("Dune", 16, "1965-08-01", 412),
    ("Murder on the Orient Express", 17, "1934-01-01", 256),
    ("And Then There Were None", 17, "1939-11-06", 272),
    ("The Hound of the Baskervilles", 18, "1902-04-01", 256),
    ("A Study in Scarlet", 18, "1887-11-01", 108),
    ("Frankenstein", 19, "1818-01-01", 280),
];

const FIRST_NAMES: &[&str] = &[
    "John", "Emma", "Michael", "Sophia", "William", "Olivia", "James", "Ava", "Robert",
    "Isabella", "David", "Mia", "Richard", "Charlotte", "Joseph", "Amelia",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis",
    "Rodriguez", "Martinez", "Wilson", "Anderson",
];

const STREETS: &[&str] = &["Main St", "Oak Ave", "Park Rd", "Elm St", "Maple Dr", "Cedar Ln"];

const NOTES: &[&str] = &["", "", "", "Requested at the front desk", "Renewal discussed", "Gift wrap"];

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub users: usize,
    pub loans: usize,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self { users: 25, loans: 75 }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedBook {
    pub title: String,
    /// Index into the seeded authors
    pub author: usize,
    pub isbn: String,
    pub description: String,
    pub publication_date: NaiveDate,
    pub pages: i32,
    pub available_copies: i32,
    pub total_copies: i32,
    /// Indexes into the seeded categories
    pub categories: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PlannedUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub address: String,
    pub date_of_birth: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct PlannedLoan {
    pub user: usize,
    pub book: usize,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct SeedPlan {
    pub books: Vec<PlannedBook>,
    pub users: Vec<PlannedUser>,
    pub loans: Vec<PlannedLoan>,
}

/// Rows written by [`apply`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SeedSummary {
    pub categories: usize,
    pub authors: usize,
    pub books: usize,
    pub users: usize,
    pub loans: usize,
}

fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap_or(NaiveDate::MIN)
}

/// Draw a consistent data set: half of the loans returned, the rest open
/// (two in five of those overdue), never two open loans for one (user, book)
/// and never more open loans than copies.
pub fn plan<R: Rng>(rng: &mut R, options: &SeedOptions, now: DateTime<Utc>) -> SeedPlan {
    let mut books: Vec<PlannedBook> = TITLES
        .iter()
        .enumerate()
        .map(|(n, &(title, author, published, pages))| {
            let total_copies = rng.gen_range(1..=5);
            let category_count = rng.gen_range(1..=3);
            PlannedBook {
                title: title.to_string(),
                author,
                isbn: format!("978{:010}", n + 1),
                description: format!("{} by {}.", title, AUTHORS[author].0),
                publication_date: date(published),
                pages,
                available_copies: total_copies,
                total_copies,
                categories: sample(&mut *rng, CATEGORIES.len(), category_count).into_vec(),
            }
        })
        .collect();

    let users: Vec<PlannedUser> = (0..options.users)
        .map(|n| {
            let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
            let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
            let username = format!("{}.{}{}", first, last, n + 1).to_lowercase();
            PlannedUser {
                email: format!("{}@example.com", username),
                username,
                first_name: first.to_string(),
                last_name: last.to_string(),
                phone_number: format!("555-{:04}", rng.gen_range(0..10_000)),
                address: format!(
                    "{} {}",
                    rng.gen_range(1..1000),
                    STREETS[rng.gen_range(0..STREETS.len())]
                ),
                date_of_birth: NaiveDate::from_ymd_opt(
                    rng.gen_range(1950..=2005),
                    rng.gen_range(1..=12),
                    rng.gen_range(1..=28),
                )
                .unwrap_or(NaiveDate::MIN),
            }
        })
        .collect();

    let mut loans = Vec::with_capacity(options.loans);
    if !users.is_empty() {
        let mut open_pairs = HashSet::new();
        for _ in 0..options.loans {
            let user = rng.gen_range(0..users.len());
            let book = rng.gen_range(0..books.len());
            let roll = rng.gen_range(0..10);
            let notes = NOTES[rng.gen_range(0..NOTES.len())].to_string();

            let open = roll >= 5
                && books[book].available_copies > 0
                && open_pairs.insert((user, book));

            let loan = if !open {
                let borrow_date = now - Duration::days(rng.gen_range(15..=120));
                PlannedLoan {
                    user,
                    book,
                    borrow_date,
                    due_date: borrow_date + Duration::days(14),
                    return_date: Some(borrow_date + Duration::days(rng.gen_range(1..=14))),
                    status: LoanStatus::Returned,
                    notes,
                }
            } else {
                books[book].available_copies -= 1;
                if roll >= 8 {
                    let due_date = now - Duration::days(rng.gen_range(1..=30));
                    PlannedLoan {
                        user,
                        book,
                        borrow_date: due_date - Duration::days(14),
                        due_date,
                        return_date: None,
                        status: LoanStatus::Overdue,
                        notes,
                    }
                } else {
                    let borrow_date = now - Duration::days(rng.gen_range(0..14));
                    PlannedLoan {
                        user,
                        book,
                        borrow_date,
                        due_date: borrow_date + Duration::days(14),
                        return_date: None,
                        status: LoanStatus::Borrowed,
                        notes,
                    }
                }
            };
            loans.push(loan);
        }
    }

    SeedPlan { books, users, loans }
}

/// Remove catalog rows, loans and non-staff users
async fn clear(tx: &mut Transaction<'_, Postgres>) -> AppResult<()> {
    for statement in [
        "DELETE FROM loans",
        "DELETE FROM book_categories",
        "DELETE FROM books",
        "DELETE FROM categories",
        "DELETE FROM authors",
        "DELETE FROM user_profiles WHERE user_id IN (SELECT id FROM users WHERE NOT is_staff)",
        "DELETE FROM users WHERE NOT is_staff",
    ] {
        sqlx::query(statement).execute(&mut **tx).await?;
    }
    Ok(())
}

/// Write `plan` in one transaction.
///
/// Existing categories, authors and users are reused by name. Books whose
/// ISBN is already taken are skipped along with their loans, so running the
/// seed twice does not duplicate anything.
pub async fn apply(pool: &PgPool, plan: &SeedPlan, wipe: bool) -> AppResult<SeedSummary> {
    let mut tx = pool.begin().await?;
    let mut summary = SeedSummary::default();

    if wipe {
        clear(&mut tx).await?;
        tracing::info!("Existing data cleared");
    }

    let mut category_ids = Vec::with_capacity(CATEGORIES.len());
    for &(name, description) in CATEGORIES {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO categories (name, description) VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;
        category_ids.push(id);
    }
    summary.categories = category_ids.len();

    let mut author_ids = Vec::with_capacity(AUTHORS.len());
    for &(name, bio, birth_date, nationality) in AUTHORS {
        let existing: Option<i32> =
            sqlx::query_scalar("SELECT id FROM authors WHERE name = $1 ORDER BY id LIMIT 1")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await?;
        let id = match existing {
            Some(id) => id,
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO authors (name, bio, birth_date, nationality)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id
                    "#,
                )
                .bind(name)
                .bind(bio)
                .bind(date(birth_date))
                .bind(nationality)
                .fetch_one(&mut *tx)
                .await?
            }
        };
        author_ids.push(id);
    }
    summary.authors = author_ids.len();

    let mut book_ids: Vec<Option<i32>> = Vec::with_capacity(plan.books.len());
    for book in &plan.books {
        let id: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO books (title, author_id, isbn, description, publication_date, pages,
                               available_copies, total_copies)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (isbn) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&book.title)
        .bind(author_ids[book.author])
        .bind(&book.isbn)
        .bind(&book.description)
        .bind(book.publication_date)
        .bind(book.pages)
        .bind(book.available_copies)
        .bind(book.total_copies)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = id {
            for &category in &book.categories {
                sqlx::query("INSERT INTO book_categories (book_id, category_id) VALUES ($1, $2)")
                    .bind(id)
                    .bind(category_ids[category])
                    .execute(&mut *tx)
                    .await?;
            }
            summary.books += 1;
        } else {
            tracing::debug!(isbn = %book.isbn, "Book already present, skipped");
        }
        book_ids.push(id);
    }

    let mut user_ids = Vec::with_capacity(plan.users.len());
    for user in &plan.users {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, email, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, phone_number, address, date_of_birth)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&user.phone_number)
        .bind(&user.address)
        .bind(user.date_of_birth)
        .execute(&mut *tx)
        .await?;
        user_ids.push(id);
    }
    summary.users = user_ids.len();

    for loan in &plan.loans {
        let Some(book_id) = book_ids[loan.book] else {
            continue;
        };
        sqlx::query(
            r#"
            INSERT INTO loans (user_id, book_id, borrow_date, due_date, return_date, status, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user_ids[loan.user])
        .bind(book_id)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.status)
        .bind(&loan.notes)
        .execute(&mut *tx)
        .await?;
        summary.loans += 1;
    }

    tx.commit().await?;
    Ok(summary)
}
