//! Reply text builders shared by the command and conversation paths.

use crate::db::Book;

/// Numbered candidate list for disambiguation prompts
pub fn format_book_list(books: &[Book]) -> String {
    books
        .iter()
        .enumerate()
        .map(|(index, book)| match &book.author {
            Some(author) => format!("**{}.** {} by {}", index + 1, book.title, author),
            None => format!("**{}.** {}", index + 1, book.title),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// "Title" or "Title by Author" suffix used in stored-entry confirmations
pub fn book_attribution(book: &Book) -> String {
    match &book.author {
        Some(author) => format!("**{}** by {}", book.title, author),
        None => format!("**{}**", book.title),
    }
}

/// Confirmation for a quote committed against a book
pub fn stored_quote(content: &str, book: &Book) -> String {
    format!(
        "✅ **Stored to Commonbase:**\n\"{}\"\n📚 From: {}",
        content,
        book_attribution(book)
    )
}

/// Confirmation for a general thought committed without a book
pub fn stored_thought(content: &str) -> String {
    format!(
        "✅ **Stored to Commonbase:**\n\"{}\"\n💭 As a general thought",
        content
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(title: &str, author: Option<&str>) -> Book {
        Book {
            id: 1,
            title: title.to_string(),
            author: author.map(|s| s.to_string()),
            image_url: None,
        }
    }

    #[test]
    fn test_format_book_list_numbers_from_one() {
        let books = vec![book("Dune", Some("Frank Herbert")), book("VALIS", None)];
        let list = format_book_list(&books);
        assert_eq!(list, "**1.** Dune by Frank Herbert\n**2.** VALIS");
    }

    #[test]
    fn test_stored_quote_includes_author_when_present() {
        let text = stored_quote("a quote", &book("Dune", Some("Frank Herbert")));
        assert!(text.contains("**Dune** by Frank Herbert"));

        let text = stored_quote("a quote", &book("VALIS", None));
        assert!(text.contains("**VALIS**"));
        assert!(!text.contains(" by "));
    }
}
