//! Boundary-tensor (environment) caches along a single lattice line.
//!
//! Given boundary MPSs `A` and `B` on either side of a line (or of a pair of
//! adjacent lines), the network restricted to that strip is a ladder:
//! ```text
//!   A[0] --- A[1] --- ... --- A[n-1]
//!    |        |                 |
//!   T[0] --- T[1] --- ... --- T[n-1]      (one or two rows of site tensors)
//!    |        |                 |
//!   B[0] --- B[1] --- ... --- B[n-1]
//! ```
//! A boundary tensor is the exact contraction of the first (or last) `k` rungs
//! of this ladder, and is grown one rung at a time. The cache keeps two stacks
//! of boundary tensors, one grown from each end of the line; the stack grown
//! from the lower end (left for a horizontal line, up for a vertical one) holds
//! at index `k` the contraction of rungs `0..k`, and the one grown from the
//! upper end holds at index `k` the contraction of rungs `n-k..n`.
//!
//! Boundary tensors have legs `(xa, l_1, ..., l_w, xb)`, where `xa` and `xb`
//! are the cut bonds of `A` and `B`, and `l_j` are the cut bonds of the `w`
//! site tensors in each rung. Site tensors here are taken in the "ladder"
//! frame `(lo, a, hi, b)`, with `lo`/`hi` running along the line and `a`/`b`
//! facing `A`/`B`.

use std::collections::VecDeque;
use ndarray as nd;
use crate::{
    error::{ EngineError, EngineResult },
    lattice::{ Orientation, Position },
    tensor::{ TenElem, contract, incompatible, inner, permute },
};

/// One of the two stacks of boundary tensors in a [`BTenCache`], addressed by
/// absolute index. Only a contiguous range of indices is retained.
#[derive(Clone, Debug)]
pub struct EnvStack<A> {
    offset: usize,
    envs: VecDeque<nd::ArrayD<A>>,
}

impl<A> Default for EnvStack<A> {
    fn default() -> Self { Self { offset: 0, envs: VecDeque::new() } }
}

impl<A> EnvStack<A> {
    fn seeded(env: nd::ArrayD<A>) -> Self {
        Self { offset: 0, envs: VecDeque::from(vec![env]) }
    }

    pub fn is_empty(&self) -> bool { self.envs.is_empty() }

    /// Return the index of the newest entry, i.e. the number of sites it
    /// covers.
    pub fn top(&self) -> Option<usize> {
        (!self.envs.is_empty()).then(|| self.offset + self.envs.len() - 1)
    }

    /// Return the lowest retained index.
    pub fn bottom(&self) -> Option<usize> {
        (!self.envs.is_empty()).then_some(self.offset)
    }

    pub fn get(&self, k: usize) -> Option<&nd::ArrayD<A>> {
        k.checked_sub(self.offset).and_then(|j| self.envs.get(j))
    }

    fn last(&self) -> Option<&nd::ArrayD<A>> { self.envs.back() }

    fn push(&mut self, env: nd::ArrayD<A>) { self.envs.push_back(env); }

    fn pop(&mut self) -> Option<nd::ArrayD<A>> {
        let env = self.envs.pop_back();
        if self.envs.is_empty() { self.offset = 0; }
        env
    }

    // drop all but the `n` newest entries
    fn keep_newest(&mut self, n: usize) {
        while self.envs.len() > n {
            self.envs.pop_front();
            self.offset += 1;
        }
    }

    // drop every entry with index `n` or greater
    fn truncate(&mut self, n: usize) {
        while self.top().is_some_and(|top| top >= n) {
            self.pop();
        }
    }
}

/// Cache of boundary tensors for one line (`width == 1`) or one pair of
/// adjacent lines (`width == 2`) of a given orientation.
///
/// A query over the `extent` sites starting at position `k` is served by lower
/// entry `k` and upper entry `len - k - extent`. Queries are only answered at
/// the frontier, i.e. when one of those two entries is the newest in its
/// stack; anything else is treated as out-of-order access.
#[derive(Clone, Debug)]
pub struct BTenCache<A> {
    orientation: Orientation,
    line: usize,
    width: usize,
    len: usize,
    lower: EnvStack<A>,
    upper: EnvStack<A>,
}

impl<A> BTenCache<A>
where A: TenElem
{
    /// Create a new, empty cache for the line(s) starting at `line`, each
    /// `len` sites long.
    pub fn new(orientation: Orientation, line: usize, width: usize, len: usize) -> Self {
        Self {
            orientation,
            line,
            width,
            len,
            lower: EnvStack::default(),
            upper: EnvStack::default(),
        }
    }

    pub fn orientation(&self) -> Orientation { self.orientation }

    pub fn line(&self) -> usize { self.line }

    pub fn width(&self) -> usize { self.width }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.lower.is_empty() && self.upper.is_empty() }

    /// Return `true` if the cache covers lattice line `line` of its
    /// orientation.
    pub fn contains_line(&self, line: usize) -> bool {
        (self.line..self.line + self.width).contains(&line)
    }

    /// Boundary tensor of an empty half-ladder.
    pub fn trivial_env(&self) -> nd::ArrayD<A> { trivial_env(self.width) }

    fn check_end(&self, end: Position) -> EngineResult<()> {
        if end.bten_orientation() != self.orientation {
            Err(EngineError::WrongDirection(end, self.orientation))
        } else {
            Ok(())
        }
    }

    /// Return the stack grown from `end`.
    ///
    /// Fails if `end` is not one of the two ends of the cached line.
    pub fn stack(&self, end: Position) -> EngineResult<&EnvStack<A>> {
        self.check_end(end)?;
        Ok(if end.is_lower() { &self.lower } else { &self.upper })
    }

    fn stack_mut(&mut self, end: Position) -> EngineResult<&mut EnvStack<A>> {
        self.check_end(end)?;
        Ok(if end.is_lower() { &mut self.lower } else { &mut self.upper })
    }

    /// Discard the stack grown from `end` and restart it from the trivial
    /// boundary tensor.
    pub fn seed(&mut self, end: Position) -> EngineResult<()> {
        let env = self.trivial_env();
        *self.stack_mut(end)? = EnvStack::seeded(env);
        Ok(())
    }

    /// Return the position of the next site to be absorbed by the stack grown
    /// from `end`, and the newest boundary tensor in it.
    pub(crate) fn growth_point(&self, end: Position)
        -> EngineResult<(usize, &nd::ArrayD<A>)>
    {
        let stack = self.stack(end)?;
        let (Some(top), Some(env)) = (stack.top(), stack.last())
            else { return Err(EngineError::BTenEmpty(end)); };
        if top >= self.len { return Err(EngineError::BTenExhausted(end)); }
        let pos = if end.is_lower() { top } else { self.len - 1 - top };
        Ok((pos, env))
    }

    pub(crate) fn push(&mut self, end: Position, env: nd::ArrayD<A>) -> EngineResult<()> {
        self.stack_mut(end)?.push(env);
        Ok(())
    }

    pub(crate) fn pop(&mut self, end: Position) -> EngineResult<nd::ArrayD<A>> {
        self.stack_mut(end)?.pop().ok_or(EngineError::BTenEmpty(end))
    }

    pub(crate) fn keep_newest(&mut self, end: Position, n: usize) -> EngineResult<()> {
        self.stack_mut(end)?.keep_newest(n);
        Ok(())
    }

    /// Return `true` if a window of `extent` sites starting at `start` can be
    /// served at the current frontier.
    pub fn serves(&self, start: usize, extent: usize) -> bool {
        self.window(start, extent).is_ok()
    }

    /// Return the pair of boundary tensors enclosing the window of `extent`
    /// sites starting at `start`.
    ///
    /// Fails if the window sticks out of the line, if either boundary tensor
    /// isn't cached, or if the window doesn't sit at the frontier.
    pub fn window(&self, start: usize, extent: usize)
        -> EngineResult<(&nd::ArrayD<A>, &nd::ArrayD<A>)>
    {
        let outside = EngineError::OutsideFrontier { start, extent };
        if start + extent > self.len { return Err(outside); }
        let k_up = self.len - start - extent;
        let anchored
            = self.lower.top() == Some(start) || self.upper.top() == Some(k_up);
        match (self.lower.get(start), self.upper.get(k_up)) {
            (Some(lo), Some(up)) if anchored => Ok((lo, up)),
            _ => Err(outside),
        }
    }

    /// Drop every cached boundary tensor that absorbed the site at position
    /// `pos`.
    pub(crate) fn invalidate_pos(&mut self, pos: usize) {
        self.lower.truncate(pos + 1);
        self.upper.truncate(self.len.saturating_sub(pos));
    }
}

/// Boundary tensor of an empty half-ladder of the given width.
pub(crate) fn trivial_env<A: TenElem>(width: usize) -> nd::ArrayD<A> {
    nd::ArrayD::ones(vec![1; width + 2])
}

/// Absorb one rung into a boundary tensor grown from the lower end.
///
/// `ts` holds the rung's site tensors in the ladder frame, ordered from the `A`
/// side to the `B` side.
pub(crate) fn grow_lower<A>(
    env: &nd::ArrayD<A>,
    ua: &nd::Array3<A>,
    ts: &[nd::Array4<A>],
    ub: &nd::Array3<A>,
) -> EngineResult<nd::ArrayD<A>>
where A: TenElem
{
    match ts {
        [t] => {
            let x = contract(env, ua, &[0], &[0])?; // (l, xb, u, xa')
            let x = contract(&x, t, &[0, 2], &[0, 1])?; // (xb, xa', h, d)
            contract(&x, ub, &[0, 3], &[0, 1]) // (xa', h, xb')
        },
        [t1, t2] => {
            let x = contract(env, ua, &[0], &[0])?; // (l1, l2, xb, u, xa')
            let x = contract(&x, t1, &[0, 3], &[0, 1])?; // (l2, xb, xa', h1, m)
            let x = contract(&x, t2, &[0, 4], &[0, 1])?; // (xb, xa', h1, h2, d)
            contract(&x, ub, &[0, 4], &[0, 1]) // (xa', h1, h2, xb')
        },
        _ => Err(incompatible()),
    }
}

/// Absorb one rung into a boundary tensor grown from the upper end.
pub(crate) fn grow_upper<A>(
    env: &nd::ArrayD<A>,
    ua: &nd::Array3<A>,
    ts: &[nd::Array4<A>],
    ub: &nd::Array3<A>,
) -> EngineResult<nd::ArrayD<A>>
where A: TenElem
{
    match ts {
        [t] => {
            let x = contract(ua, env, &[2], &[0])?; // (xa, u, h, xb')
            let x = contract(&x, t, &[1, 2], &[1, 2])?; // (xa, xb', l, d)
            contract(&x, ub, &[1, 3], &[2, 1]) // (xa, l, xb)
        },
        [t1, t2] => {
            let x = contract(ua, env, &[2], &[0])?; // (xa, u, h1, h2, xb')
            let x = contract(&x, t1, &[1, 2], &[1, 2])?; // (xa, h2, xb', l1, m)
            let x = contract(&x, t2, &[1, 4], &[2, 1])?; // (xa, xb', l1, l2, d)
            contract(&x, ub, &[1, 4], &[2, 1]) // (xa, l1, l2, xb)
        },
        _ => Err(incompatible()),
    }
}

/// Join a lower and an upper boundary tensor that meet at the same cut.
#[inline]
pub(crate) fn close<A>(lower: &nd::ArrayD<A>, upper: &nd::ArrayD<A>) -> EngineResult<A>
where A: TenElem
{
    inner(lower, upper)
}

/// Contract everything around a single-width rung, leaving its site tensor
/// out. The result is in the ladder frame `(lo, a, hi, b)`.
pub(crate) fn hole<A>(
    lower: &nd::ArrayD<A>,
    ua: &nd::Array3<A>,
    ub: &nd::Array3<A>,
    upper: &nd::ArrayD<A>,
) -> EngineResult<nd::ArrayD<A>>
where A: TenElem
{
    let x = contract(lower, ua, &[0], &[0])?; // (l, xb, u, xa')
    let x = contract(&x, ub, &[1], &[0])?; // (l, u, xa', d, xb')
    let x = contract(&x, upper, &[2, 4], &[0, 2])?; // (l, u, d, h)
    Ok(permute(&x, &[0, 1, 3, 2]))
}
