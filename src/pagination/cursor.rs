/// Position and termination state of one pagination run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    /// Next page to visit (1-based)
    pub current_page: u32,
    pub consecutive_empty_pages: u32,
    pub max_pages: u32,
    pub max_empty_pages: u32,
}

impl PageCursor {
    pub fn new(max_pages: u32, max_empty_pages: u32) -> Self {
        Self {
            current_page: 1,
            consecutive_empty_pages: 0,
            max_pages,
            max_empty_pages,
        }
    }

    /// True once the page cap or the consecutive-empty cap has been hit
    pub fn is_exhausted(&self) -> bool {
        self.current_page > self.max_pages
            || self.consecutive_empty_pages >= self.max_empty_pages
    }

    /// Records the outcome of the page just visited and moves to the next one
    pub fn advance(&mut self, had_content: bool) {
        if had_content {
            self.consecutive_empty_pages = 0;
        } else {
            self.consecutive_empty_pages += 1;
        }
        self.current_page += 1;
    }
}
