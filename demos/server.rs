//! Simple REST API server example for the circulation engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /books` - Add a book
//! - `GET /books` - Search books (`?title=&author=&genre=`)
//! - `DELETE /books/{id}` - Delete a book and its copies
//! - `POST /books/{id}/copies` - Add a copy of a book
//! - `GET /books/{id}/copies` - List copies of a book (`?available=true` to filter)
//! - `DELETE /copies/{id}` - Delete a copy
//! - `POST /customers` - Register a customer
//! - `GET /customers/{id}` - Get a customer
//! - `DELETE /customers/{id}` - Delete a customer
//! - `GET /customers/{id}/returnable` - Copies the customer can return
//! - `POST /checkouts` - Check a copy out
//! - `POST /returns` - Return a copy
//!
//! The acting staff member is read from the `x-staff` header.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/books \
//!   -H "Content-Type: application/json" \
//!   -d '{"title": "Dune", "author": "Herbert", "genre": "Sci-Fi"}'
//!
//! curl -X POST http://localhost:3000/books/1/copies
//!
//! curl -X POST http://localhost:3000/customers \
//!   -H "Content-Type: application/json" \
//!   -d '{"first_name": "Ada", "last_name": "Lovelace", "email": "ada@example.org"}'
//!
//! curl -X POST http://localhost:3000/checkouts \
//!   -H "Content-Type: application/json" -H "x-staff: alice" \
//!   -d '{"copy_id": 1, "customer_id": 1}'
//!
//! curl http://localhost:3000/customers/1/returnable
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use library_ledger_rs::{
    Book, BookCopy, BookId, BookQuery, CopyId, Customer, CustomerId, Engine, ErrorKind,
    LibraryError, NewBook, NewCustomer, RequestContext, ReturnableCopy, TransactionId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// === Request/Response DTOs ===

/// Request body for checkouts and returns.
#[derive(Debug, Deserialize)]
pub struct LoanRequest {
    pub copy_id: u32,
    pub customer_id: u32,
}

#[derive(Debug, Deserialize)]
pub struct CopyFilter {
    #[serde(default)]
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct Created<T> {
    pub id: T,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: TransactionId,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the circulation engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Builds the request context from the `x-staff` header.
fn context(headers: &HeaderMap) -> RequestContext {
    let actor = headers
        .get("x-staff")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anonymous");
    RequestContext::new(actor)
}

// === Error Handling ===

/// Wrapper for converting `LibraryError` into HTTP responses.
pub struct AppError(LibraryError);

impl From<LibraryError> for AppError {
    fn from(err: LibraryError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = match &self.0 {
            LibraryError::BookNotFound(_) => "BOOK_NOT_FOUND",
            LibraryError::CopyNotFound(_) => "COPY_NOT_FOUND",
            LibraryError::CustomerNotFound(_) => "CUSTOMER_NOT_FOUND",
            LibraryError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LibraryError::CopyUnavailable(_) => "COPY_UNAVAILABLE",
            LibraryError::NoOpenTransaction { .. } => "NO_OPEN_TRANSACTION",
            LibraryError::CopyInUse(_) => "COPY_IN_USE",
            LibraryError::CustomerHasOpenLoans(_) => "CUSTOMER_HAS_OPEN_LOANS",
            LibraryError::DuplicateEmail(_) => "DUPLICATE_EMAIL",
            LibraryError::IdsExhausted(_) => "IDS_EXHAUSTED",
            LibraryError::Validation { .. } => "VALIDATION",
            LibraryError::InvariantViolation(_) => "INVARIANT_VIOLATION",
        };
        let status = match self.0.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidState => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::InvariantViolation => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /books - Add a book.
async fn create_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(book): Json<NewBook>,
) -> Result<(StatusCode, Json<Created<BookId>>), AppError> {
    let id = state.engine.add_book(&context(&headers), book)?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

/// GET /books - Search the catalog.
async fn search_books(
    State(state): State<AppState>,
    Query(query): Query<BookQuery>,
) -> Json<Vec<Book>> {
    Json(state.engine.search_books(&query))
}

/// DELETE /books/{id} - Delete a book and its copies.
async fn delete_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_book(&context(&headers), BookId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /books/{id}/copies - Add a copy.
async fn create_copy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Result<(StatusCode, Json<BookCopy>), AppError> {
    let copy_id = state.engine.add_copy(&context(&headers), BookId(id))?;
    let copy = state.engine.copy(copy_id)?;
    Ok((StatusCode::CREATED, Json(copy)))
}

/// GET /books/{id}/copies - List copies of a book.
async fn list_copies(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Query(filter): Query<CopyFilter>,
) -> Result<Json<Vec<BookCopy>>, AppError> {
    let catalog = state.engine.catalog();
    let copies = if filter.available {
        catalog.available_copies_of(BookId(id))?
    } else {
        catalog.copies_of(BookId(id))?
    };
    Ok(Json(copies))
}

/// DELETE /copies/{id} - Delete a copy.
async fn delete_copy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Result<StatusCode, AppError> {
    state.engine.delete_copy(&context(&headers), CopyId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /customers - Register a customer.
async fn create_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(customer): Json<NewCustomer>,
) -> Result<(StatusCode, Json<Created<CustomerId>>), AppError> {
    let id = state.engine.add_customer(&context(&headers), customer)?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

/// GET /customers/{id} - Get a customer.
async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Customer>, AppError> {
    Ok(Json(state.engine.customer(CustomerId(id))?))
}

/// DELETE /customers/{id} - Delete a customer.
async fn delete_customer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .delete_customer(&context(&headers), CustomerId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /customers/{id}/returnable - Copies the customer can return.
async fn returnable_copies(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Vec<ReturnableCopy>>, AppError> {
    let copies: Vec<ReturnableCopy> = state.engine.open_transactions_for(CustomerId(id))?.collect();
    Ok(Json(copies))
}

/// POST /checkouts - Check a copy out.
async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoanRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let transaction_id = state.engine.checkout(
        &context(&headers),
        CopyId(request.copy_id),
        CustomerId(request.customer_id),
    )?;
    Ok((StatusCode::CREATED, Json(TransactionResponse { transaction_id })))
}

/// POST /returns - Return a copy.
async fn return_book(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoanRequest>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction_id = state.engine.return_book(
        &context(&headers),
        CopyId(request.copy_id),
        CustomerId(request.customer_id),
    )?;
    Ok(Json(TransactionResponse { transaction_id }))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/books", post(create_book).get(search_books))
        .route("/books/{id}", delete(delete_book))
        .route("/books/{id}/copies", post(create_copy).get(list_copies))
        .route("/copies/{id}", delete(delete_copy))
        .route("/customers", post(create_customer))
        .route("/customers/{id}", get(get_customer).delete(delete_customer))
        .route("/customers/{id}/returnable", get(returnable_copies))
        .route("/checkouts", post(checkout))
        .route("/returns", post(return_book))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let state = AppState {
        engine: Arc::new(Engine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    tracing::info!("Library API server running on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}
